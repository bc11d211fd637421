use crate::acme::http::HttpClient;
use crate::crypto::SignatureError;
use reqwest::StatusCode;
use serde::Deserialize;
use std::fmt::{Display, Formatter};
use std::time::SystemTime;

pub type ProtocolResult<T> = Result<T, Error>;

/// Problem type the v1 endpoints use when an account exceeds a rate limit.
pub const RATE_LIMITED: &str = "urn:acme:error:rateLimited";

#[derive(Debug)]
pub enum Error {
    /// The request never got an HTTP answer.
    Http(reqwest::Error),
    /// The CA answered, but not the way the protocol requires.
    ProtocolViolation(&'static str),
    UnexpectedStatus(UnexpectedStatusError),
    RateLimited(RateLimitError),
    DeserializationFailed(serde_json::Error),
    /// The CA validated the challenge and rejected it.
    ChallengeInvalid,
    CryptoFailure(SignatureError),
    TimedOut(&'static str),
}

impl Error {
    /// Turns a response whose status did not match `expected` into an error. A problem document
    /// in the body is kept so the CA's explanation reaches the operator.
    pub async fn from_response(
        operation: &'static str,
        expected: StatusCode,
        response: reqwest::Response,
    ) -> Error {
        let actual = response.status();
        let retry_after = HttpClient::extract_backoff(&response);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return Error::Http(e),
        };
        match serde_json::from_str::<Problem>(&body).ok() {
            Some(problem) if problem.is_rate_limit() => Error::RateLimited(RateLimitError {
                problem,
                retry_after,
            }),
            problem => Error::UnexpectedStatus(UnexpectedStatusError {
                operation,
                expected,
                actual,
                problem,
                body,
            }),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Error {
        Error::Http(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::DeserializationFailed(err)
    }
}

impl From<SignatureError> for Error {
    fn from(err: SignatureError) -> Error {
        Error::CryptoFailure(err)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::ProtocolViolation(e) => write!(f, "ACME protocol violated: {e}"),
            Error::UnexpectedStatus(e) => write!(f, "{e}"),
            Error::RateLimited(e) => write!(f, "{e}"),
            Error::DeserializationFailed(e) => write!(f, "parsing server response failed: {e}"),
            Error::ChallengeInvalid => write!(f, "The CA marked the challenge as invalid"),
            Error::CryptoFailure(e) => write!(f, "signing the request failed: {e}"),
            Error::TimedOut(msg) => write!(f, "timeout: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        // Display already includes the wrapped error, so continue the chain one level below it
        match &self {
            Error::Http(e) => e.source(),
            Error::DeserializationFailed(e) => e.source(),
            Error::CryptoFailure(e) => e.source(),
            Error::ProtocolViolation(_)
            | Error::UnexpectedStatus(_)
            | Error::RateLimited(_)
            | Error::ChallengeInvalid
            | Error::TimedOut(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct UnexpectedStatusError {
    pub operation: &'static str,
    pub expected: StatusCode,
    pub actual: StatusCode,
    pub problem: Option<Problem>,
    pub body: String,
}

impl Display for UnexpectedStatusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} failed: expected HTTP {}, got {}",
            self.operation,
            self.expected.as_u16(),
            self.actual.as_u16()
        )?;
        match &self.problem {
            Some(problem) => write!(f, ": {problem}"),
            None if self.body.is_empty() => Ok(()),
            None => write!(f, ": {}", self.body),
        }
    }
}

/// An error document (`application/problem+json`) returned by the CA.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub typ: String,
    pub detail: Option<String>,
    pub status: Option<u16>,
}

impl Problem {
    pub fn is_rate_limit(&self) -> bool {
        self.typ == RATE_LIMITED
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.detail.as_deref().unwrap_or(&self.typ))
    }
}

#[derive(Debug)]
pub struct RateLimitError {
    pub problem: Problem,
    pub retry_after: Option<SystemTime>,
}

impl Display for RateLimitError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "The CA enforced a rate limit: {}", self.problem)?;
        if let Some(retry_after) = self.retry_after {
            write!(f, ", retry after {}", time::OffsetDateTime::from(retry_after))?;
        }
        Ok(())
    }
}
