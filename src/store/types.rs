use crate::acme::object::Token;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A registration with the CA. One per contact email, reused across renewals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Account {
    pub email: String,
    pub private_key_pem: String,
}

/// A certificate for a single domain. Created holding only key and CSR, completed once the CA
/// issued the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Certificate {
    pub domain: String,
    /// base64url-encoded DER of the signing request
    pub csr: String,
    pub private_key_pem: String,
    pub cert_pem: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub renew_by: Option<OffsetDateTime>,
}

impl Certificate {
    pub fn new(domain: String, csr: String, private_key_pem: String) -> Self {
        Self {
            domain,
            csr,
            private_key_pem,
            cert_pem: None,
            renew_by: None,
        }
    }

    /// Whether this record needs to go through issuance again at `now`. Records that were never
    /// completed always do.
    pub fn must_renew(&self, now: OffsetDateTime) -> bool {
        match (&self.cert_pem, self.renew_by) {
            (Some(_), Some(renew_by)) => renew_by <= now,
            _ => true,
        }
    }
}

/// A pending HTTP-01 challenge, answered at `/.well-known/acme-challenge/{token}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub domain: String,
    pub token: Token,
    pub key_authorization: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Challenge {
    pub fn new(domain: String, token: Token, key_authorization: String) -> Self {
        Self {
            domain,
            token,
            key_authorization,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn is_expired(&self, ttl: time::Duration, now: OffsetDateTime) -> bool {
        self.created_at + ttl <= now
    }
}
