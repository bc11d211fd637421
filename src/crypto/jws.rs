use crate::acme::object::{Nonce, Token};
use crate::crypto::asymmetric::RsaKeyPair;
use crate::crypto::{SignatureError, base64url, sha256};
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// The unprotected part of the JWS header. ACME v1 servers expect it next to the protected header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    #[serde(rename = "alg")]
    algorithm: Algorithm,
    jwk: JsonWebKeyRsa,
}

#[derive(Debug, Serialize)]
pub struct ProtectedHeader<'a> {
    #[serde(flatten)]
    header: &'a Header,
    nonce: &'a Nonce,
}

impl<'a> ProtectedHeader<'a> {
    pub fn new(header: &'a Header, nonce: &'a Nonce) -> Self {
        Self { header, nonce }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Algorithm {
    #[serde(rename = "RS256")]
    RsaPkcs1Sha256,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonWebKeyRsa {
    #[serde(rename = "kty")]
    key_type: String,
    #[serde(rename = "n")]
    modulus: String,
    #[serde(rename = "e")]
    exponent: String,
}

impl JsonWebKeyRsa {
    pub fn new(modulus: String, exponent: String) -> Self {
        Self {
            key_type: "RSA".to_string(),
            modulus,
            exponent,
        }
    }
}

#[derive(Debug)]
pub struct JsonWebKey {
    keypair: RsaKeyPair,
    header: Header,
    thumbprint: String,
}

impl JsonWebKey {
    fn compute_account_thumbprint(parameters: &JsonWebKeyRsa) -> String {
        // Members in lexicographic order without whitespace, which serde_json does not promise
        let canonical = format!(
            r#"{{"e":"{}","kty":"{}","n":"{}"}}"#,
            parameters.exponent, parameters.key_type, parameters.modulus
        );
        base64url(sha256(canonical.as_bytes()))
    }

    pub fn new(keypair: RsaKeyPair) -> Self {
        let jwk = keypair.to_jwk();
        let thumbprint = JsonWebKey::compute_account_thumbprint(&jwk);
        Self {
            keypair,
            header: Header {
                algorithm: Algorithm::RsaPkcs1Sha256,
                jwk,
            },
            thumbprint,
        }
    }

    pub fn from_pem(pem: &str) -> anyhow::Result<Self> {
        Ok(Self::new(RsaKeyPair::from_pem(pem)?))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Signs `payload` into the flattened envelope posted to the CA. The nonce is embedded in the
    /// protected header only.
    pub fn sign<T: Serialize>(
        &self,
        nonce: &Nonce,
        payload: &T,
    ) -> Result<JsonWebSignature, SignatureError> {
        let protected = base64url(serde_json::to_vec(&ProtectedHeader::new(&self.header, nonce))?);
        let payload = base64url(serde_json::to_vec(payload)?);
        let signature = self.keypair.sign(format!("{protected}.{payload}").as_bytes())?;
        Ok(JsonWebSignature {
            header: self.header.clone(),
            protected,
            payload,
            signature: base64url(signature),
        })
    }

    pub fn get_acme_thumbprint(&self) -> &str {
        &self.thumbprint
    }
}

/// The key authorization proves control over the account key for a given challenge token.
pub fn compute_key_authorization(token: &Token, key: &JsonWebKey) -> String {
    let thumbprint = key.get_acme_thumbprint();
    format!("{token}.{thumbprint}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JsonWebSignature {
    pub header: Header,
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl JsonWebSignature {
    fn parse_base64_json(value: &str) -> anyhow::Result<serde_json::Value> {
        let raw_json = BASE64_URL_SAFE_NO_PAD.decode(value)?;
        Ok(serde_json::from_slice(&raw_json)?)
    }

    pub fn protected_json(&self) -> anyhow::Result<serde_json::Value> {
        Self::parse_base64_json(&self.protected)
    }

    pub fn payload_json(&self) -> anyhow::Result<serde_json::Value> {
        Self::parse_base64_json(&self.payload)
    }
}
