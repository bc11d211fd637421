use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;

pub mod asymmetric;
pub mod jws;

pub const SHA256_LENGTH: usize = 32;

/// Computes the SHA2-256 digest over the provided byte slice.
pub fn sha256(input: &[u8]) -> [u8; SHA256_LENGTH] {
    let digest = aws_lc_rs::digest::digest(&aws_lc_rs::digest::SHA256, input);
    let mut output = [0; SHA256_LENGTH];
    output.copy_from_slice(digest.as_ref());
    output
}

/// URL-safe base64 without padding, the encoding used for every binary value on the wire.
pub fn base64url<T: AsRef<[u8]>>(input: T) -> String {
    BASE64_URL_SAFE_NO_PAD.encode(input)
}

/// Failure while producing a signed request.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("JSON encoding failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0}")]
    SignatureGeneration(&'static str),
    #[error("{0}")]
    EncodingFailed(&'static str),
}
