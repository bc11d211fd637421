use crate::crypto::jws::JsonWebKeyRsa;
use crate::crypto::{SignatureError, base64url};
use anyhow::{Context, anyhow, bail};
use aws_lc_rs::{encoding::AsDer, rand::SystemRandom, rsa, signature};
use pem::Pem;
use std::fmt::{Display, Formatter};

/// Key size used for account keys and certificate keys unless configured otherwise.
pub const DEFAULT_RSA_BITS: u32 = 4096;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KeyType(rsa::KeySize);

impl KeyType {
    pub fn from_bits(bits: u32) -> anyhow::Result<Self> {
        let size = match bits {
            2048 => rsa::KeySize::Rsa2048,
            3072 => rsa::KeySize::Rsa3072,
            4096 => rsa::KeySize::Rsa4096,
            8192 => rsa::KeySize::Rsa8192,
            _ => bail!("Unsupported RSA key size {bits}, expected one of 2048, 3072, 4096 or 8192"),
        };
        Ok(Self(size))
    }
}

impl Display for KeyType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RSA-{}", self.0.len() * 8)
    }
}

#[derive(Debug)]
pub struct RsaKeyPair {
    keypair: signature::RsaKeyPair,
}

impl RsaKeyPair {
    fn new(keypair: signature::RsaKeyPair) -> Self {
        Self { keypair }
    }

    pub fn generate(typ: KeyType) -> anyhow::Result<Self> {
        let keypair = signature::RsaKeyPair::generate(typ.0)
            .map_err(|_| anyhow!("Could not generate {typ} key"))?;
        Ok(Self::new(keypair))
    }

    pub fn from_pem(pem: &str) -> anyhow::Result<Self> {
        // rcgen accepts PKCS#1 as well as PKCS#8 input and hands back normalized PKCS#8
        let rcgen_keypair =
            rcgen::KeyPair::from_pem(pem).context("reading private key from pem failed")?;
        let alg = rcgen_keypair.algorithm();
        if alg != &rcgen::PKCS_RSA_SHA256
            && alg != &rcgen::PKCS_RSA_SHA384
            && alg != &rcgen::PKCS_RSA_SHA512
        {
            bail!("unsupported algorithm in PEM, only RSA keys are supported");
        }
        Self::from_pkcs8(rcgen_keypair.serialized_der())
    }

    pub fn from_pkcs8(der: &[u8]) -> anyhow::Result<Self> {
        let keypair = signature::RsaKeyPair::from_pkcs8(der)
            .map_err(|_| anyhow!("RSA private key file is corrupted or invalid"))?;
        Ok(Self::new(keypair))
    }

    /// RSASSA-PKCS1-v1_5 signature with SHA-256 (JOSE `RS256`).
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let random = SystemRandom::new();
        let sig_len = self.keypair.public_modulus_len();
        let mut signature = vec![0; sig_len];
        self.keypair
            .sign(
                &signature::RSA_PKCS1_SHA256,
                &random,
                message,
                &mut signature,
            )
            .map_err(|_| SignatureError::SignatureGeneration("RSA signing failed"))?;
        Ok(signature)
    }

    pub fn to_pem(&self) -> Result<Pem, SignatureError> {
        let data = self
            .keypair
            .as_der()
            .map_err(|_| SignatureError::EncodingFailed("Serializing RSA keypair failed"))?;
        let pem = Pem::new("PRIVATE KEY", data.as_ref());
        Ok(pem)
    }

    pub fn to_jwk(&self) -> JsonWebKeyRsa {
        let public_key = signature::KeyPair::public_key(&self.keypair);
        JsonWebKeyRsa::new(
            base64url(public_key.modulus().big_endian_without_leading_zero()),
            base64url(public_key.exponent().big_endian_without_leading_zero()),
        )
    }

    pub fn to_rcgen_keypair(&self) -> anyhow::Result<rcgen::KeyPair> {
        let pem = self.to_pem()?;
        Ok(rcgen::KeyPair::from_pem(&pem.to_string())?)
    }
}

/// Creates a fresh RSA private key and returns it PKCS#8 PEM encoded.
pub fn generate_key_pair(bits: u32) -> anyhow::Result<String> {
    let typ = KeyType::from_bits(bits)?;
    let keypair = RsaKeyPair::generate(typ)?;
    Ok(keypair.to_pem()?.to_string())
}
