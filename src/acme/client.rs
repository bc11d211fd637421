use crate::acme::error::{Error, ProtocolResult};
use crate::acme::http::HttpClient;
use crate::acme::object::{
    Authorization, AuthorizationRequest, CertificateRequest, ChallengeDescriptor, ChallengeResponse,
    ChallengeState, ChallengeStatus, Directory, Nonce, RegistrationRequest,
};
use crate::acme::poll::PollStrategy;
use crate::cert::der_to_pem;
use crate::crypto::jws::{JsonWebKey, compute_key_authorization};
use crate::store::types::{Certificate, Challenge};
use reqwest::{Response, StatusCode};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

/// Maximum number of status requests while waiting for a challenge to be validated
pub const MAX_POLL_ATTEMPTS: usize = 5;

const DIRECTORY_PATH: &str = "directory";

pub struct AcmeClientBuilder {
    base_url: Url,
    account_key: JsonWebKey,
    email: String,
    http_client: Option<HttpClient>,
}

impl AcmeClientBuilder {
    pub fn new(base_url: Url, account_key: JsonWebKey, email: String) -> AcmeClientBuilder {
        Self {
            base_url,
            account_key,
            email,
            http_client: None,
        }
    }

    #[must_use]
    pub fn with_http_client(mut self, http_client: HttpClient) -> Self {
        self.http_client = Some(http_client);
        self
    }

    /// Creates the client and fetches the CA's directory.
    pub async fn try_build(self) -> ProtocolResult<AcmeClient> {
        AcmeClient::try_new(self).await
    }
}

/// Speaks the ACME v1 protocol on behalf of one account.
///
/// Every signed request is preceded by a fresh `HEAD` on the directory URL to obtain its nonce.
/// Nonces are never reused or pooled.
#[derive(Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct AcmeClient {
    http_client: HttpClient,
    directory_url: Url,
    directory: Directory,
    account_key: JsonWebKey,
    email: String,
}

impl AcmeClient {
    async fn try_new(builder: AcmeClientBuilder) -> ProtocolResult<Self> {
        let http_client = match builder.http_client {
            Some(http_client) => http_client,
            None => HttpClient::try_new()?,
        };
        let directory_url = directory_url(&builder.base_url)?;
        debug!("Requesting ACME directory {directory_url}");
        let directory_response = http_client.get(&directory_url).await?;
        let directory = match directory_response.status() {
            StatusCode::OK => serde_json::from_slice(&directory_response.bytes().await?)?,
            _ => {
                return Err(Error::from_response(
                    "fetch directory",
                    StatusCode::OK,
                    directory_response,
                )
                .await);
            }
        };
        Ok(Self {
            http_client,
            directory_url,
            directory,
            account_key: builder.account_key,
            email: builder.email,
        })
    }

    pub fn get_directory(&self) -> &Directory {
        &self.directory
    }

    pub fn account_key(&self) -> &JsonWebKey {
        &self.account_key
    }

    pub async fn get_nonce(&self) -> ProtocolResult<Nonce> {
        let response = self.http_client.head(&self.directory_url).await?;
        HttpClient::extract_nonce(&response).ok_or(Error::ProtocolViolation(
            "Server did not provide a (valid) Replay-Nonce",
        ))
    }

    async fn post_signed<T: Serialize>(&self, target_url: &Url, payload: &T) -> ProtocolResult<Response> {
        let nonce = self.get_nonce().await?;
        let signed = self.account_key.sign(&nonce, payload)?;
        self.http_client.post(target_url, &signed).await
    }

    /// Registers the account. If the key is already registered, the existing registration is
    /// updated with the current contact and agreement instead.
    pub async fn register_account(&self) -> ProtocolResult<()> {
        let email = &self.email;
        debug!("Registering account {email}");
        let agreement = self.directory.terms_of_service().cloned();
        let payload = RegistrationRequest::new_registration(email, agreement);
        let response = self.post_signed(&self.directory.new_reg, &payload).await?;
        match response.status() {
            StatusCode::CREATED => {
                info!("Registered new account {email}");
                Ok(())
            }
            StatusCode::CONFLICT => {
                let account_url = HttpClient::extract_location(&response).ok_or(
                    Error::ProtocolViolation("Server reported an existing account without its URL"),
                )?;
                self.update_account(&account_url).await
            }
            _ => Err(Error::from_response("register account", StatusCode::CREATED, response).await),
        }
    }

    pub async fn update_account(&self, account_url: &Url) -> ProtocolResult<()> {
        let email = &self.email;
        debug!("Updating existing account {account_url} for {email}");
        let agreement = self.directory.terms_of_service().cloned();
        let payload = RegistrationRequest::update(email, agreement);
        let response = self.post_signed(account_url, &payload).await?;
        expect_status("update account", StatusCode::ACCEPTED, response).await?;
        debug!("Contact of account {account_url} updated to {email}");
        Ok(())
    }

    pub async fn register_domain(&self, domain: &str) -> ProtocolResult<Authorization> {
        debug!("Requesting authorization for {domain}");
        let payload = AuthorizationRequest::new(domain);
        let response = self.post_signed(&self.directory.new_authz, &payload).await?;
        let response = expect_status("register domain", StatusCode::CREATED, response).await?;
        let authorization = serde_json::from_slice(&response.bytes().await?)?;
        debug!("Authorization for {domain} created");
        Ok(authorization)
    }

    pub fn prepare_http_challenge(&self, domain: &str, descriptor: &ChallengeDescriptor) -> Challenge {
        let key_authorization = compute_key_authorization(&descriptor.token, &self.account_key);
        Challenge::new(domain.to_string(), descriptor.token.clone(), key_authorization)
    }

    /// Tells the CA that the challenge response is in place and validation may start.
    pub async fn notify_challenge_ready(&self, challenge_url: &Url, challenge: &Challenge) -> ProtocolResult<()> {
        let token = &challenge.token;
        debug!("Notifying CA that challenge {token} is ready");
        let payload = ChallengeResponse::new(&challenge.key_authorization);
        let response = self.post_signed(challenge_url, &payload).await?;
        expect_status("notify challenge", StatusCode::ACCEPTED, response).await?;
        Ok(())
    }

    /// Polls the challenge until the CA reports a final status, waiting as `strategy` dictates
    /// before each of at most [`MAX_POLL_ATTEMPTS`] requests.
    pub async fn poll_challenge_status(
        &self,
        challenge_url: &Url,
        strategy: &dyn PollStrategy,
    ) -> ProtocolResult<()> {
        for attempt in 0..MAX_POLL_ATTEMPTS {
            tokio::time::sleep(strategy.delay(attempt)).await;
            let response = self.http_client.get(challenge_url).await?;
            let response = expect_status("poll challenge", StatusCode::ACCEPTED, response).await?;
            let state: ChallengeState = serde_json::from_slice(&response.bytes().await?)?;
            debug!("Challenge {challenge_url} is {}", state.status);
            match state.status {
                ChallengeStatus::Pending => {}
                ChallengeStatus::Valid => return Ok(()),
                ChallengeStatus::Invalid => return Err(Error::ChallengeInvalid),
                ChallengeStatus::Unknown => {
                    return Err(Error::ProtocolViolation("CA reported an unknown challenge status"));
                }
            }
        }
        Err(Error::TimedOut("challenge still pending after the maximum number of polls"))
    }

    /// Submits the CSR and returns the URL the issued certificate can be downloaded from.
    pub async fn sign_certificate(&self, certificate: &Certificate) -> ProtocolResult<Url> {
        let domain = &certificate.domain;
        debug!("Submitting CSR for {domain}");
        let payload = CertificateRequest::new(&certificate.csr);
        let response = self.post_signed(&self.directory.new_cert, &payload).await?;
        let response = expect_status("sign certificate", StatusCode::CREATED, response).await?;
        HttpClient::extract_location(&response).ok_or(Error::ProtocolViolation(
            "Server did not provide a certificate URL",
        ))
    }

    /// Downloads the issued certificate and its issuer, returned as a PEM chain (leaf first).
    pub async fn download_certificate(&self, certificate_url: &Url) -> ProtocolResult<String> {
        debug!("Downloading certificate from {certificate_url}");
        let response = self.http_client.get(certificate_url).await?;
        let response = expect_status("download certificate", StatusCode::OK, response).await?;
        let issuer_url = HttpClient::extract_relation_links(&response)
            .into_iter()
            .find(|link| link.relation == "up")
            .map(|link| link.url)
            .ok_or(Error::ProtocolViolation(
                "Server did not link the issuer certificate",
            ))?;
        let mut chain = der_to_pem(&response.bytes().await?);

        debug!("Downloading issuer certificate from {issuer_url}");
        let response = self.http_client.get(&issuer_url).await?;
        let response = expect_status("download issuer certificate", StatusCode::OK, response).await?;
        chain.push_str(&der_to_pem(&response.bytes().await?));
        Ok(chain)
    }
}

async fn expect_status(
    operation: &'static str,
    expected: StatusCode,
    response: Response,
) -> ProtocolResult<Response> {
    if response.status() == expected {
        Ok(response)
    } else {
        Err(Error::from_response(operation, expected, response).await)
    }
}

fn directory_url(base_url: &Url) -> ProtocolResult<Url> {
    let base = base_url.as_str().trim_end_matches('/');
    Url::parse(&format!("{base}/{DIRECTORY_PATH}"))
        .map_err(|_| Error::ProtocolViolation("CA base URL cannot be extended to a directory URL"))
}
