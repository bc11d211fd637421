#![allow(dead_code)]

use certkeeper::acme::poll::Immediate;
use certkeeper::challenge::ChallengeCoordinator;
use certkeeper::lock::{ClusterLock, LocalLock};
use certkeeper::manager::{CertificateManager, ManagerConfig, ProcessRole};
use certkeeper::store::CertificateStore;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

pub const EMAIL: &str = "admin@example.com";
pub const CHALLENGE_TOKEN: &str = "fakeCaHttpToken";

/// How long the certificates issued by [`FakeCa`] are valid.
pub const ISSUED_VALIDITY: time::Duration = time::Duration::days(90);

/// A self-signed certificate for `domain` valid between the two points in time, DER encoded.
pub fn self_signed_der(domain: &str, not_before: OffsetDateTime, not_after: OffsetDateTime) -> Vec<u8> {
    let key = rcgen::KeyPair::generate().unwrap();
    let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.distinguished_name.push(rcgen::DnType::CommonName, domain);
    params.not_before = not_before;
    params.not_after = not_after;
    params.self_signed(&key).unwrap().der().to_vec()
}

pub fn server_url(server: &ServerGuard) -> Url {
    Url::parse(&server.url()).unwrap()
}

/// How the fake CA answers a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Created,
    /// The key is already registered at `/acct/42`.
    Conflict,
}

/// An ACME v1 CA on top of a mockito server. It hands out real (self-signed) certificates, and
/// every mock counts its requests for later assertions.
pub struct FakeCa {
    pub server: ServerGuard,
    pub directory: Mock,
    pub nonces: Mock,
    /// Set once a challenge notification arrived while the key authorization was being served.
    pub challenge_was_served: Arc<AtomicBool>,
}

impl FakeCa {
    pub async fn start() -> Self {
        let mut server = Server::new_async().await;
        let url = server.url();
        let directory = server
            .mock("GET", "/directory")
            .with_status(200)
            .with_body(
                json!({
                    "new-reg": format!("{url}/acme/new-reg"),
                    "new-authz": format!("{url}/acme/new-authz"),
                    "new-cert": format!("{url}/acme/new-cert"),
                    "meta": {"terms-of-service": format!("{url}/terms")}
                })
                .to_string(),
            )
            .create_async()
            .await;
        let nonces = server
            .mock("HEAD", "/directory")
            .with_status(200)
            .with_header("Replay-Nonce", "fakeNonce")
            .create_async()
            .await;
        Self {
            server,
            directory,
            nonces,
            challenge_was_served: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn url(&self) -> Url {
        server_url(&self.server)
    }

    pub async fn mock_registration(&mut self, registration: Registration) -> Vec<Mock> {
        match registration {
            Registration::Created => vec![
                self.server
                    .mock("POST", "/acme/new-reg")
                    .with_status(201)
                    .with_body(r#"{"contact":["mailto:admin@example.com"]}"#)
                    .create_async()
                    .await,
            ],
            Registration::Conflict => vec![
                self.server
                    .mock("POST", "/acme/new-reg")
                    .with_status(409)
                    .with_header("Location", "/acct/42")
                    .with_body(r#"{"type":"urn:acme:error:malformed","detail":"Registration key is already in use"}"#)
                    .create_async()
                    .await,
                self.server
                    .mock("POST", "/acct/42")
                    .with_status(202)
                    .with_body(r#"{"contact":["mailto:admin@example.com"]}"#)
                    .create_async()
                    .await,
            ],
        }
    }

    /// Offers an http-01 challenge for any domain. The notification checks whether `coordinator`
    /// serves the key authorization at that moment.
    pub async fn mock_authorization(&mut self, coordinator: &ChallengeCoordinator) -> Vec<Mock> {
        let url = self.server.url();
        let authorization = self
            .server
            .mock("POST", "/acme/new-authz")
            .with_status(201)
            .with_body(
                json!({
                    "identifier": {"type": "dns", "value": "example.com"},
                    "status": "pending",
                    "challenges": [
                        {"type": "http-01", "uri": format!("{url}/acme/challenge/1"), "token": CHALLENGE_TOKEN}
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let coordinator = coordinator.clone();
        let served = self.challenge_was_served.clone();
        let notify = self
            .server
            .mock("POST", "/acme/challenge/1")
            .with_status(202)
            .with_body_from_request(move |_| {
                if let Some(challenge) = coordinator.get(CHALLENGE_TOKEN) {
                    served.store(
                        challenge.key_authorization.starts_with(&format!("{CHALLENGE_TOKEN}.")),
                        Ordering::SeqCst,
                    );
                }
                json!({"type": "http-01", "status": "pending"}).to_string().into()
            })
            .create_async()
            .await;
        vec![authorization, notify]
    }

    /// Answers status polls with `statuses` in order, repeating the last one. Expects exactly one
    /// poll per status.
    pub async fn mock_challenge_statuses(&mut self, statuses: &'static [&'static str]) -> Mock {
        let calls = AtomicUsize::new(0);
        self.server
            .mock("GET", "/acme/challenge/1")
            .with_status(202)
            .with_body_from_request(move |_| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                let status = statuses[call.min(statuses.len() - 1)];
                json!({"type": "http-01", "status": status}).to_string().into()
            })
            .expect(statuses.len())
            .create_async()
            .await
    }

    /// Answers every CSR with the same certificate for `domain`, valid for [`ISSUED_VALIDITY`].
    /// The returned mocks are the CSR submission, the download and the issuer download.
    pub async fn mock_issuance(&mut self, domain: &str) -> Vec<Mock> {
        let now = OffsetDateTime::now_utc();
        let leaf = self_signed_der(domain, now - time::Duration::hours(1), now + ISSUED_VALIDITY);
        let issuer = self_signed_der(
            "issuer.fake-ca.test",
            now - time::Duration::days(365),
            now + time::Duration::days(365),
        );
        let new_cert = self
            .server
            .mock("POST", "/acme/new-cert")
            .with_status(201)
            .with_header("Location", "/acme/cert/1")
            .create_async()
            .await;
        let download = self
            .server
            .mock("GET", "/acme/cert/1")
            .with_status(200)
            .with_header("Content-Type", "application/pkix-cert")
            .with_header("Link", r#"</acme/issuer-cert>;rel="up""#)
            .with_body(leaf)
            .create_async()
            .await;
        let issuer = self
            .server
            .mock("GET", "/acme/issuer-cert")
            .with_status(200)
            .with_header("Content-Type", "application/pkix-cert")
            .with_body(issuer)
            .create_async()
            .await;
        vec![new_cert, download, issuer]
    }
}

/// A server that fails the test on any request it receives, once the returned mocks are asserted.
pub async fn unreachable_ca() -> (ServerGuard, Vec<Mock>) {
    let mut server = Server::new_async().await;
    let mut mocks = Vec::new();
    for method in ["GET", "HEAD", "POST"] {
        mocks.push(
            server
                .mock(method, Matcher::Any)
                .with_status(500)
                .expect(0)
                .create_async()
                .await,
        );
    }
    (server, mocks)
}

pub fn manager_config(ca_url: Url, domains: &[&str]) -> ManagerConfig {
    let mut config = ManagerConfig::new(
        ca_url,
        EMAIL.to_string(),
        domains.iter().map(ToString::to_string).collect(),
    );
    config.key_bits = 2048;
    config.poll_strategy = Arc::new(Immediate);
    config.allow_plain_http = true;
    config.deadline = Duration::from_secs(30);
    config
}

pub fn manager(
    ca_url: Url,
    store: Arc<dyn CertificateStore>,
    role: ProcessRole,
    domains: &[&str],
) -> CertificateManager {
    manager_with_lock(ca_url, store, Arc::new(LocalLock::new()), role, domains)
}

pub fn manager_with_lock(
    ca_url: Url,
    store: Arc<dyn CertificateStore>,
    lock: Arc<dyn ClusterLock>,
    role: ProcessRole,
    domains: &[&str],
) -> CertificateManager {
    let coordinator = ChallengeCoordinator::new().with_store(store.clone());
    CertificateManager::new(manager_config(ca_url, domains), store, lock, role, coordinator)
}

/// Asserts that `actual` lies within a minute of `expected`.
pub fn assert_close_to(actual: OffsetDateTime, expected: OffsetDateTime) {
    let difference = (actual - expected).abs();
    assert!(
        difference < time::Duration::minutes(1),
        "{actual} is not close to {expected}"
    );
}
