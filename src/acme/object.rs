use crate::acme::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct Directory {
    #[serde(rename = "new-reg")]
    pub new_reg: Url,
    #[serde(rename = "new-authz")]
    pub new_authz: Url,
    #[serde(rename = "new-cert")]
    pub new_cert: Url,
    #[serde(rename = "revoke-cert")]
    pub revoke_cert: Option<Url>,
    #[serde(rename = "key-change")]
    pub key_change: Option<Url>,
    pub meta: Option<Metadata>,
}

impl Directory {
    pub fn terms_of_service(&self) -> Option<&Url> {
        self.meta.as_ref().and_then(|meta| meta.terms_of_service.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct Metadata {
    #[serde(rename = "terms-of-service")]
    pub terms_of_service: Option<Url>,
    pub website: Option<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Nonce(String);

impl TryFrom<String> for Nonce {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check_base64url(&value, "malformed nonce")?;
        Ok(Self(value))
    }
}

impl FromStr for Nonce {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Nonce::try_from(s.to_string())
    }
}

impl Display for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A challenge token. Only the base64url alphabet is accepted, which keeps tokens safe to use
/// in URL paths and file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Token {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check_base64url(&value, "malformed token")?;
        Ok(Self(value))
    }
}

impl FromStr for Token {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Token::try_from(s.to_string())
    }
}

impl From<Token> for String {
    fn from(value: Token) -> Self {
        value.0
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn check_base64url(value: &str, error: &'static str) -> Result<(), Error> {
    let alphabet = |c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_';
    if value.is_empty() || !value.chars().all(alphabet) {
        debug!("Rejecting {value:?}: {error}");
        return Err(Error::ProtocolViolation(error));
    }
    Ok(())
}

/// Payload of both `new-reg` and the `reg` update of an existing registration.
#[derive(Debug, Serialize)]
pub struct RegistrationRequest {
    pub resource: &'static str,
    pub contact: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agreement: Option<Url>,
}

impl RegistrationRequest {
    pub fn new_registration(email: &str, agreement: Option<Url>) -> Self {
        Self {
            resource: "new-reg",
            contact: vec![format!("mailto:{email}")],
            agreement,
        }
    }

    pub fn update(email: &str, agreement: Option<Url>) -> Self {
        Self {
            resource: "reg",
            ..Self::new_registration(email, agreement)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum Identifier {
    Dns {
        value: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
pub struct AuthorizationRequest {
    pub resource: &'static str,
    pub identifier: Identifier,
}

impl AuthorizationRequest {
    pub fn new(domain: &str) -> Self {
        Self {
            resource: "new-authz",
            identifier: Identifier::Dns {
                value: domain.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct Authorization {
    pub identifier: Option<Identifier>,
    pub status: Option<ChallengeStatus>,
    /// Kept loosely typed: only the challenge we answer has to be well-formed.
    #[serde(default)]
    pub challenges: Vec<serde_json::Value>,
}

impl Authorization {
    /// The first `http-01` challenge offered by the CA.
    pub fn http_challenge(&self) -> Result<ChallengeDescriptor, Error> {
        let offered = self
            .challenges
            .iter()
            .find(|challenge| challenge.get("type").and_then(serde_json::Value::as_str) == Some(HTTP_01))
            .ok_or(Error::ProtocolViolation("CA did not offer an http-01 challenge"))?;
        ChallengeDescriptor::deserialize(offered).map_err(|e| {
            debug!("Rejecting http-01 challenge {offered}: {e}");
            Error::ProtocolViolation("CA offered a malformed http-01 challenge")
        })
    }
}

pub const HTTP_01: &str = "http-01";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct ChallengeDescriptor {
    #[serde(rename = "type")]
    pub typ: String,
    pub uri: Url,
    pub token: Token,
    pub status: Option<ChallengeStatus>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
#[cfg_attr(test, derive(Serialize))]
pub enum ChallengeStatus {
    Pending,
    Valid,
    Invalid,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse<'a> {
    pub resource: &'static str,
    pub key_authorization: &'a str,
}

impl<'a> ChallengeResponse<'a> {
    pub fn new(key_authorization: &'a str) -> Self {
        Self {
            resource: "challenge",
            key_authorization,
        }
    }
}

#[derive(Debug, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub struct ChallengeState {
    pub status: ChallengeStatus,
}

#[derive(Debug, Serialize)]
pub struct CertificateRequest<'a> {
    pub resource: &'static str,
    /// base64url-encoded DER of the PKCS#10 request
    pub csr: &'a str,
}

impl<'a> CertificateRequest<'a> {
    pub fn new(csr: &'a str) -> Self {
        Self {
            resource: "new-cert",
            csr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_deserialize_directory() {
        let json = r#"{
  "key-change": "https://acme-staging.api.letsencrypt.org/acme/key-change",
  "meta": {
    "terms-of-service": "https://letsencrypt.org/documents/LE-SA-v1.2-November-15-2017.pdf"
  },
  "new-authz": "https://acme-staging.api.letsencrypt.org/acme/new-authz",
  "new-cert": "https://acme-staging.api.letsencrypt.org/acme/new-cert",
  "new-reg": "https://acme-staging.api.letsencrypt.org/acme/new-reg",
  "revoke-cert": "https://acme-staging.api.letsencrypt.org/acme/revoke-cert"
}"#;
        let directory: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(
            directory.new_reg.as_str(),
            "https://acme-staging.api.letsencrypt.org/acme/new-reg"
        );
        assert_eq!(
            directory.new_authz.as_str(),
            "https://acme-staging.api.letsencrypt.org/acme/new-authz"
        );
        assert_eq!(
            directory.new_cert.as_str(),
            "https://acme-staging.api.letsencrypt.org/acme/new-cert"
        );
        assert_eq!(
            directory.terms_of_service().unwrap().as_str(),
            "https://letsencrypt.org/documents/LE-SA-v1.2-November-15-2017.pdf"
        );
    }

    #[test]
    fn test_deserialize_directory_without_meta() {
        let json = r#"{"new-reg":"https://ca/reg","new-authz":"https://ca/authz","new-cert":"https://ca/cert"}"#;
        let directory: Directory = serde_json::from_str(json).unwrap();
        assert!(directory.terms_of_service().is_none());
    }

    #[rstest]
    #[case::valid("oFvnlFP1wIhRlYS2jTaXbA", true)]
    #[case::dash_and_underscore("a-b_c", true)]
    #[case::empty("", false)]
    #[case::padding("abc=", false)]
    #[case::slash("../etc/passwd", false)]
    fn test_token_validation(#[case] value: &str, #[case] valid: bool) {
        assert_eq!(Token::from_str(value).is_ok(), valid);
    }

    #[rstest]
    #[case("\"pending\"", ChallengeStatus::Pending)]
    #[case("\"valid\"", ChallengeStatus::Valid)]
    #[case("\"invalid\"", ChallengeStatus::Invalid)]
    #[case("\"processing\"", ChallengeStatus::Unknown)]
    fn test_deserialize_challenge_status(#[case] json: &str, #[case] expected: ChallengeStatus) {
        let status: ChallengeStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status, expected);
    }

    #[test]
    fn test_deserialize_authorization_and_select_http_challenge() {
        let json = r#"{
  "identifier": {"type": "dns", "value": "example.com"},
  "status": "pending",
  "expires": "2018-03-01T00:00:00Z",
  "challenges": [
    {"type": "dns-01", "status": "pending", "uri": "https://ca/challenge/1", "token": "dnsToken"},
    {"type": "http-01", "status": "pending", "uri": "https://ca/challenge/2", "token": "httpToken"},
    {"type": "tls-sni-01", "status": "pending", "uri": "https://ca/challenge/3", "token": "sniToken"}
  ],
  "combinations": [[0], [1], [2]]
}"#;
        let authorization: Authorization = serde_json::from_str(json).unwrap();
        assert_eq!(authorization.challenges.len(), 3);
        let http = authorization.http_challenge().unwrap();
        assert_eq!(http.typ, HTTP_01);
        assert_eq!(http.uri.as_str(), "https://ca/challenge/2");
        assert_eq!(http.token.as_str(), "httpToken");
    }

    #[test]
    fn test_authorization_without_http_challenge() {
        let json = r#"{"challenges":[{"type":"dns-01","uri":"https://ca/c/1","token":"t"}]}"#;
        let authorization: Authorization = serde_json::from_str(json).unwrap();
        assert!(matches!(
            authorization.http_challenge(),
            Err(Error::ProtocolViolation("CA did not offer an http-01 challenge"))
        ));
    }

    #[test]
    fn test_malformed_foreign_challenge_is_ignored() {
        let json = r#"{"challenges":[
  {"type": "proofOfPossession-01", "uri": "https://ca/c/0"},
  {"type": "http-01", "uri": "https://ca/c/1", "token": "httpToken"}
]}"#;
        let authorization: Authorization = serde_json::from_str(json).unwrap();
        let http = authorization.http_challenge().unwrap();
        assert_eq!(http.uri.as_str(), "https://ca/c/1");
        assert_eq!(http.token.as_str(), "httpToken");
    }

    #[rstest]
    #[case::missing_token(r#"{"type": "http-01", "uri": "https://ca/c/1"}"#)]
    #[case::invalid_token(r#"{"type": "http-01", "uri": "https://ca/c/1", "token": "../x"}"#)]
    #[case::missing_uri(r#"{"type": "http-01", "token": "httpToken"}"#)]
    fn test_malformed_http_challenge(#[case] challenge: &str) {
        let json = format!(r#"{{"challenges":[{challenge}]}}"#);
        let authorization: Authorization = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            authorization.http_challenge(),
            Err(Error::ProtocolViolation("CA offered a malformed http-01 challenge"))
        ));
    }

    #[test]
    fn test_serialize_requests() {
        let agreement = Url::parse("https://ca/terms").unwrap();
        let registration =
            RegistrationRequest::new_registration("admin@example.com", Some(agreement.clone()));
        assert_eq!(
            serde_json::to_value(&registration).unwrap(),
            serde_json::json!({
                "resource": "new-reg",
                "contact": ["mailto:admin@example.com"],
                "agreement": "https://ca/terms"
            })
        );
        let update = RegistrationRequest::update("admin@example.com", Some(agreement));
        assert_eq!(serde_json::to_value(&update).unwrap()["resource"], "reg");

        assert_eq!(
            serde_json::to_value(AuthorizationRequest::new("example.com")).unwrap(),
            serde_json::json!({
                "resource": "new-authz",
                "identifier": {"type": "dns", "value": "example.com"}
            })
        );
        assert_eq!(
            serde_json::to_value(ChallengeResponse::new("token.thumb")).unwrap(),
            serde_json::json!({"resource": "challenge", "keyAuthorization": "token.thumb"})
        );
        assert_eq!(
            serde_json::to_value(CertificateRequest::new("MIIB")).unwrap(),
            serde_json::json!({"resource": "new-cert", "csr": "MIIB"})
        );
    }
}
