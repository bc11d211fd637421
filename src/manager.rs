use crate::acme::client::{AcmeClient, AcmeClientBuilder};
use crate::acme::http::HttpClient;
use crate::acme::poll::{FixedDelay, PollStrategy};
use crate::cert::{compute_renew_by, generate_csr};
use crate::challenge::ChallengeCoordinator;
use crate::crypto::asymmetric::{DEFAULT_RSA_BITS, generate_key_pair};
use crate::crypto::base64url;
use crate::crypto::jws::JsonWebKey;
use crate::error::{IssueError, IssueResult};
use crate::lock::ClusterLock;
use crate::store::CertificateStore;
use crate::store::types::{Account, Certificate};
use crate::time::{humanize_duration, humanize_duration_core};
use anyhow::anyhow;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use url::Url;

/// Name of the cluster lock held while certificates are obtained.
pub const GET_CERTS_LOCK: &str = "certkeeper-get-certs";

/// How long the issuance of a single domain may take, including all CA round trips.
pub const DEFAULT_ISSUANCE_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// How this process takes part in a group of processes serving the same domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// The only process; no cluster lock is taken.
    Standalone,
    /// The supervising process of a group. May clear stale locks at startup.
    Primary,
    /// One of several processes sharing the listening sockets.
    Worker,
}

impl ProcessRole {
    fn takes_cluster_lock(self) -> bool {
        !matches!(self, ProcessRole::Standalone)
    }
}

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Base URL of the CA; the directory is expected at `<base>/directory`.
    pub directory_url: Url,
    pub account_email: String,
    /// Domains to obtain certificates for. The first one provides the default certificate.
    pub domains: Vec<String>,
    pub key_bits: u32,
    pub poll_strategy: Arc<dyn PollStrategy>,
    pub deadline: Duration,
    /// Permit `http://` CA URLs. Only meant for local test authorities.
    pub allow_plain_http: bool,
}

impl ManagerConfig {
    pub fn new(directory_url: Url, account_email: String, domains: Vec<String>) -> Self {
        Self {
            directory_url,
            account_email,
            domains,
            key_bits: DEFAULT_RSA_BITS,
            poll_strategy: Arc::new(FixedDelay::default()),
            deadline: DEFAULT_ISSUANCE_DEADLINE,
            allow_plain_http: false,
        }
    }
}

/// Certificate chain and private key for one domain, both PEM encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertifiedPem {
    pub domain: String,
    pub cert_pem: String,
    pub private_key_pem: String,
}

/// Immutable snapshot of the certificates available for TLS termination.
#[derive(Debug, Default)]
pub struct SecureContextCache {
    contexts: HashMap<String, CertifiedPem>,
    default_domain: Option<String>,
}

impl SecureContextCache {
    fn from_certificates(certificates: &[Certificate]) -> Self {
        let mut cache = Self::default();
        for certificate in certificates {
            let Some(cert_pem) = &certificate.cert_pem else {
                warn!(
                    "Certificate for {} has not been issued, not serving it",
                    certificate.domain
                );
                continue;
            };
            cache
                .default_domain
                .get_or_insert_with(|| certificate.domain.clone());
            cache.contexts.insert(
                certificate.domain.clone(),
                CertifiedPem {
                    domain: certificate.domain.clone(),
                    cert_pem: cert_pem.clone(),
                    private_key_pem: certificate.private_key_pem.clone(),
                },
            );
        }
        cache
    }

    pub fn get(&self, domain: &str) -> Option<&CertifiedPem> {
        self.contexts.get(domain)
    }

    pub fn default_context(&self) -> Option<&CertifiedPem> {
        self.default_domain
            .as_ref()
            .and_then(|domain| self.contexts.get(domain))
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

/// Obtains, renews and serves the certificates of the configured domains.
pub struct CertificateManager {
    config: ManagerConfig,
    store: Arc<dyn CertificateStore>,
    lock: Arc<dyn ClusterLock>,
    role: ProcessRole,
    coordinator: ChallengeCoordinator,
    cache: ArcSwap<SecureContextCache>,
    pass_completed: tokio::sync::Mutex<bool>,
}

impl CertificateManager {
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn CertificateStore>,
        lock: Arc<dyn ClusterLock>,
        role: ProcessRole,
        coordinator: ChallengeCoordinator,
    ) -> Self {
        Self {
            config,
            store,
            lock,
            role,
            coordinator,
            cache: ArcSwap::from_pointee(SecureContextCache::default()),
            pass_completed: tokio::sync::Mutex::new(false),
        }
    }

    pub fn coordinator(&self) -> &ChallengeCoordinator {
        &self.coordinator
    }

    pub fn role(&self) -> ProcessRole {
        self.role
    }

    /// The certificate of the first configured domain.
    ///
    /// The first call in this process resolves all certificates under the cluster lock. Fails if
    /// no certificate could be resolved.
    pub async fn get_default(&self) -> IssueResult<CertifiedPem> {
        let mut pass_completed = self.pass_completed.lock().await;
        if !*pass_completed {
            self.ensure_all_certificates_locked().await?;
            *pass_completed = true;
        }
        drop(pass_completed);
        self.cache
            .load()
            .default_context()
            .cloned()
            .ok_or(IssueError::NoCertificate)
    }

    /// The certificate for `domain`, if one has been resolved. Meant for SNI callbacks.
    pub fn get_secure_context(&self, domain: &str) -> Option<CertifiedPem> {
        self.cache.load().get(domain).cloned()
    }

    /// The current set of resolved certificates.
    pub fn secure_contexts(&self) -> Arc<SecureContextCache> {
        self.cache.load_full()
    }

    /// Releases all cluster locks left behind by crashed processes. Only the primary process may
    /// do this; for other roles this does nothing.
    pub async fn release_stale_locks(&self) -> IssueResult<()> {
        if self.role == ProcessRole::Primary {
            info!("Clearing stale cluster locks");
            self.lock.clear().await?;
        } else {
            debug!("Not clearing cluster locks as {:?} process", self.role);
        }
        Ok(())
    }

    async fn ensure_all_certificates_locked(&self) -> IssueResult<Vec<Certificate>> {
        if !self.role.takes_cluster_lock() {
            return self.ensure_all_certificates().await;
        }
        let domain_count = u32::try_from(self.config.domains.len()).unwrap_or(u32::MAX);
        let hold_for = self.config.deadline.saturating_mul(domain_count.saturating_add(1));
        self.lock.lock(GET_CERTS_LOCK, hold_for).await?;
        let result = self.ensure_all_certificates().await;
        let unlocked = self.lock.unlock(GET_CERTS_LOCK).await;
        match &unlocked {
            Ok(true) => {}
            Ok(false) => warn!("Cluster lock {GET_CERTS_LOCK} was no longer held when releasing it"),
            Err(e) => error!("Could not release cluster lock {GET_CERTS_LOCK}: {e}"),
        }
        let certificates = result?;
        unlocked?;
        Ok(certificates)
    }

    /// Makes sure every configured domain has a valid certificate, issuing or renewing where
    /// needed, and publishes the result for [`get_secure_context`](Self::get_secure_context).
    ///
    /// Domains are processed in configuration order. The first failure aborts the whole pass and
    /// leaves the previously published certificates in place.
    pub async fn ensure_all_certificates(&self) -> IssueResult<Vec<Certificate>> {
        let purged = self.coordinator.purge_expired();
        if purged > 0 {
            debug!("Dropped {purged} expired challenges");
        }
        let stored = futures::future::try_join_all(
            self.config
                .domains
                .iter()
                .map(|domain| self.store.get_certificate(domain)),
        )
        .await?;

        let now = OffsetDateTime::now_utc();
        let mut client = None;
        let mut certificates = Vec::with_capacity(stored.len());
        for (domain, stored) in self.config.domains.iter().zip(stored) {
            match stored {
                Some(certificate) if !certificate.must_renew(now) => {
                    if let Some(renew_by) = certificate.renew_by {
                        debug!(
                            "Reusing certificate for {domain}, renewal due in {}",
                            humanize_duration(renew_by - now)
                        );
                    }
                    certificates.push(certificate);
                    continue;
                }
                Some(_) => info!("Certificate for {domain} is due for renewal"),
                None => info!("No certificate for {domain} yet"),
            }
            let client = match &mut client {
                Some(client) => client,
                None => {
                    let built = self.within(self.deadline(), domain, self.build_client()).await?;
                    client.insert(built)
                }
            };
            certificates.push(self.issue_certificate(client, domain).await?);
        }

        let cache = SecureContextCache::from_certificates(&certificates);
        debug!("Serving {} certificates", cache.len());
        self.cache.store(Arc::new(cache));
        Ok(certificates)
    }

    fn deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.deadline)
            .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
    }

    async fn within<T, F>(&self, deadline: Instant, domain: &str, future: F) -> IssueResult<T>
    where
        F: Future<Output = IssueResult<T>>,
    {
        tokio::time::timeout_at(deadline, future)
            .await
            .map_err(|_| {
                let deadline = humanize_duration_core(self.config.deadline)
                    .unwrap_or_else(|_| format!("{:?}", self.config.deadline));
                IssueError::TimedOut(format!(
                    "issuance for {domain} did not finish within {deadline}"
                ))
            })?
    }

    /// Returns the configured account, creating and storing a new account key if needed.
    pub async fn ensure_account(&self) -> IssueResult<Account> {
        let email = &self.config.account_email;
        if let Some(account) = self.store.get_account(email).await? {
            return Ok(account);
        }
        info!("Creating new account key for {email}");
        let private_key_pem = generate_key(self.config.key_bits).await?;
        let account = Account {
            email: email.clone(),
            private_key_pem,
        };
        self.store.save_account(&account).await?;
        Ok(account)
    }

    async fn build_client(&self) -> IssueResult<AcmeClient> {
        let account = self.ensure_account().await?;
        let account_key =
            JsonWebKey::from_pem(&account.private_key_pem).map_err(IssueError::Crypto)?;
        let http_client = if self.config.allow_plain_http {
            HttpClient::try_new_allowing_plain_http()?
        } else {
            HttpClient::try_new()?
        };
        Ok(AcmeClientBuilder::new(
            self.config.directory_url.clone(),
            account_key,
            account.email,
        )
        .with_http_client(http_client)
        .try_build()
        .await?)
    }

    /// Runs the whole issuance sequence for `domain` under the configured deadline. The published
    /// challenge is withdrawn whether validation succeeds, fails or runs out of time.
    async fn issue_certificate(&self, client: &AcmeClient, domain: &str) -> IssueResult<Certificate> {
        let acme_error = |e| IssueError::from_acme(domain, e);
        let deadline = self.deadline();
        info!("Requesting certificate for {domain}");
        let descriptor = self
            .within(deadline, domain, async {
                client.register_account().await.map_err(acme_error)?;
                let authorization = client.register_domain(domain).await.map_err(acme_error)?;
                authorization.http_challenge().map_err(acme_error)
            })
            .await?;

        let challenge = client.prepare_http_challenge(domain, &descriptor);
        let token = challenge.token.to_string();
        self.coordinator.publish(challenge.clone()).await?;
        let validation = self
            .within(deadline, domain, async {
                client
                    .notify_challenge_ready(&descriptor.uri, &challenge)
                    .await
                    .map_err(acme_error)?;
                client
                    .poll_challenge_status(&descriptor.uri, self.config.poll_strategy.as_ref())
                    .await
                    .map_err(acme_error)
            })
            .await;
        self.coordinator.withdraw(&token).await;
        validation?;
        debug!("Domain {domain} validated");

        self.within(deadline, domain, async {
            let private_key_pem = generate_key(self.config.key_bits).await?;
            let csr = generate_csr(&private_key_pem, domain).map_err(IssueError::Crypto)?;
            let mut certificate =
                Certificate::new(domain.to_string(), base64url(csr), private_key_pem);
            let certificate_url = client
                .sign_certificate(&certificate)
                .await
                .map_err(acme_error)?;
            let cert_pem = client
                .download_certificate(&certificate_url)
                .await
                .map_err(acme_error)?;

            let renew_by = compute_renew_by(OffsetDateTime::now_utc(), &cert_pem);
            certificate.cert_pem = Some(cert_pem);
            certificate.renew_by = Some(renew_by);
            self.store.save_certificate(&certificate).await?;
            info!("Obtained certificate for {domain}, renewing after {renew_by}");
            Ok(certificate)
        })
        .await
    }
}

/// RSA key generation takes a while for large keys, so keep it off the async workers.
async fn generate_key(bits: u32) -> IssueResult<String> {
    tokio::task::spawn_blocking(move || generate_key_pair(bits))
        .await
        .map_err(|e| IssueError::Crypto(anyhow!("key generation task failed: {e}")))?
        .map_err(IssueError::Crypto)
}
