use crate::acme::error::Error as AcmeError;
use crate::lock::LockError;
use crate::store::StorageError;

pub type IssueResult<T> = Result<T, IssueError>;

/// Everything that can go wrong while obtaining or serving certificates.
#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error("network failure while talking to the CA: {0}")]
    Network(#[source] AcmeError),
    #[error("CA protocol error: {0}")]
    Protocol(#[source] AcmeError),
    #[error("the CA rejected the challenge for {domain}")]
    ChallengeFailed { domain: String },
    #[error("certificate storage failed: {0}")]
    Storage(#[from] StorageError),
    #[error("cluster lock failed: {0}")]
    Lock(#[from] LockError),
    #[error("cryptographic operation failed: {0:#}")]
    Crypto(anyhow::Error),
    #[error("timed out: {0}")]
    TimedOut(String),
    #[error("no certificate is available")]
    NoCertificate,
}

impl IssueError {
    /// Maps a protocol-level error raised while working on `domain`.
    pub fn from_acme(domain: &str, err: AcmeError) -> Self {
        match err {
            AcmeError::Http(_) => IssueError::Network(err),
            AcmeError::ChallengeInvalid => IssueError::ChallengeFailed {
                domain: domain.to_string(),
            },
            AcmeError::CryptoFailure(_) => IssueError::Crypto(err.into()),
            AcmeError::TimedOut(msg) => IssueError::TimedOut(format!("{domain}: {msg}")),
            AcmeError::ProtocolViolation(_)
            | AcmeError::UnexpectedStatus(_)
            | AcmeError::DeserializationFailed(_)
            | AcmeError::RateLimited(_) => IssueError::Protocol(err),
        }
    }
}

impl From<AcmeError> for IssueError {
    fn from(err: AcmeError) -> Self {
        match err {
            AcmeError::Http(_) => IssueError::Network(err),
            AcmeError::CryptoFailure(_) => IssueError::Crypto(err.into()),
            AcmeError::TimedOut(msg) => IssueError::TimedOut(msg.to_string()),
            _ => IssueError::Protocol(err),
        }
    }
}
