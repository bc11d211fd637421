use crate::store::types::Challenge;
use crate::store::{CertificateStore, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub mod responder;

pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Pending challenges stop being answered after this long.
pub const DEFAULT_CHALLENGE_TTL: time::Duration = time::Duration::minutes(10);

/// Returns the token addressed by an HTTP-01 validation request path, if the path is one.
pub fn extract_token(path: &str) -> Option<&str> {
    let token = path.strip_prefix(ACME_CHALLENGE_PREFIX)?;
    if token.is_empty() || token.contains('/') {
        None
    } else {
        Some(token)
    }
}

/// Holds the challenges that are currently being validated, keyed by token.
///
/// Clones share the same set of challenges. When a store is attached, tokens unknown to this process
/// are looked up there too, so a process that did not start the validation can still answer it.
#[derive(Clone)]
pub struct ChallengeCoordinator {
    challenges: Arc<RwLock<HashMap<String, Challenge>>>,
    ttl: time::Duration,
    store: Option<Arc<dyn CertificateStore>>,
}

impl Debug for ChallengeCoordinator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeCoordinator")
            .field("pending", &self.challenges.read().len())
            .field("ttl", &self.ttl)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl Default for ChallengeCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeCoordinator {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CHALLENGE_TTL)
    }

    pub fn with_ttl(ttl: time::Duration) -> Self {
        Self {
            challenges: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CertificateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ttl(&self) -> time::Duration {
        self.ttl
    }

    /// Adds a challenge, replacing any earlier one with the same token.
    pub fn put(&self, challenge: Challenge) {
        debug!("Serving challenge {} for {}", challenge.token, challenge.domain);
        self.challenges
            .write()
            .insert(challenge.token.to_string(), challenge);
    }

    pub fn get(&self, token: &str) -> Option<Challenge> {
        let now = OffsetDateTime::now_utc();
        self.challenges
            .read()
            .get(token)
            .filter(|challenge| !challenge.is_expired(self.ttl, now))
            .cloned()
    }

    pub fn remove(&self, token: &str) -> Option<Challenge> {
        self.challenges.write().remove(token)
    }

    /// Drops all expired challenges and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let mut challenges = self.challenges.write();
        let before = challenges.len();
        challenges.retain(|_, challenge| !challenge.is_expired(self.ttl, now));
        before - challenges.len()
    }

    /// Like [`get`](Self::get), but falls back to the attached store for tokens this process
    /// does not hold.
    pub async fn lookup(&self, token: &str) -> StorageResult<Option<Challenge>> {
        if let Some(challenge) = self.get(token) {
            return Ok(Some(challenge));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };
        let now = OffsetDateTime::now_utc();
        Ok(store
            .get_challenge(token)
            .await?
            .filter(|challenge| !challenge.is_expired(self.ttl, now)))
    }

    /// Publishes a challenge to this process and, if attached, to the store.
    pub async fn publish(&self, challenge: Challenge) -> StorageResult<()> {
        if let Some(store) = &self.store {
            store.save_challenge(&challenge).await?;
        }
        self.put(challenge);
        Ok(())
    }

    /// Withdraws a challenge everywhere it was published. Failing to remove it from the store is
    /// only logged, since the TTL hides it anyway.
    pub async fn withdraw(&self, token: &str) {
        self.remove(token);
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_challenge(token).await {
                warn!("Failed to remove challenge {token} from storage: {e:#}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::object::Token;
    use crate::store::MemoryStore;
    use rstest::rstest;
    use std::str::FromStr;

    fn challenge(token: &str) -> Challenge {
        Challenge::new(
            "example.com".to_string(),
            Token::from_str(token).unwrap(),
            format!("{token}.thumbprint"),
        )
    }

    #[rstest]
    #[case("/.well-known/acme-challenge/abc-123", Some("abc-123"))]
    #[case("/.well-known/acme-challenge/", None)]
    #[case("/.well-known/acme-challenge/abc/def", None)]
    #[case("/index.html", None)]
    fn test_extract_token(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(extract_token(path), expected);
    }

    #[test]
    fn test_put_get_remove() {
        let coordinator = ChallengeCoordinator::new();
        coordinator.put(challenge("token"));
        assert_eq!(
            coordinator.get("token").unwrap().key_authorization,
            "token.thumbprint"
        );
        assert!(coordinator.get("other").is_none());
        assert!(coordinator.remove("token").is_some());
        assert!(coordinator.get("token").is_none());
    }

    #[test]
    fn test_put_replaces_existing_token() {
        let coordinator = ChallengeCoordinator::new();
        coordinator.put(challenge("token"));
        let mut replacement = challenge("token");
        replacement.key_authorization = "token.other".to_string();
        coordinator.put(replacement);
        assert_eq!(coordinator.get("token").unwrap().key_authorization, "token.other");
    }

    #[test]
    fn test_clones_share_challenges() {
        let coordinator = ChallengeCoordinator::new();
        let clone = coordinator.clone();
        coordinator.put(challenge("token"));
        assert!(clone.get("token").is_some());
    }

    #[test]
    fn test_expired_challenge_is_hidden_and_purged() {
        let coordinator = ChallengeCoordinator::new();
        let mut stale = challenge("stale");
        stale.created_at = OffsetDateTime::now_utc() - DEFAULT_CHALLENGE_TTL;
        coordinator.put(stale);
        coordinator.put(challenge("fresh"));

        assert!(coordinator.get("stale").is_none());
        assert_eq!(coordinator.purge_expired(), 1);
        assert!(coordinator.get("fresh").is_some());
        assert_eq!(coordinator.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_store() {
        let store = Arc::new(MemoryStore::new());
        let publisher = ChallengeCoordinator::new().with_store(store.clone());
        let other_process = ChallengeCoordinator::new().with_store(store.clone());

        publisher.publish(challenge("token")).await.unwrap();

        assert!(other_process.get("token").is_none());
        let found = other_process.lookup("token").await.unwrap().unwrap();
        assert_eq!(found.key_authorization, "token.thumbprint");

        publisher.withdraw("token").await;
        assert!(other_process.lookup("token").await.unwrap().is_none());
        assert!(store.get_challenge("token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_ignores_expired_stored_challenge() {
        let store = Arc::new(MemoryStore::new());
        let mut stale = challenge("token");
        stale.created_at = OffsetDateTime::now_utc() - time::Duration::hours(1);
        store.save_challenge(&stale).await.unwrap();

        let coordinator = ChallengeCoordinator::new().with_store(store);

        assert!(coordinator.lookup("token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lookup_without_store() {
        let coordinator = ChallengeCoordinator::new();
        assert!(coordinator.lookup("token").await.unwrap().is_none());
    }
}
