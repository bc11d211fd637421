use crate::crypto::asymmetric::RsaKeyPair;
use anyhow::{Context, Error};
use pem::{EncodeConfig, LineEnding, Pem};
use std::io::{BufRead, Cursor, Seek};
use time::OffsetDateTime;
use tracing::warn;
use x509_parser::prelude::FromDer;

/// The maximum number of certificates we will parse in a PEM-array of certificates by default
const DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH: usize = 100;

/// A freshly issued certificate is renewed this long after issuance.
pub const RENEW_AFTER: time::Duration = time::Duration::days(61);
/// Renewal never waits past the certificate's expiry minus this margin.
pub const EXPIRY_SAFETY_MARGIN: time::Duration = time::Duration::days(7);

/// Builds a PKCS#10 request carrying `common_name` as the only subject attribute and returns its
/// DER encoding.
pub fn generate_csr(private_key_pem: &str, common_name: &str) -> Result<Vec<u8>, Error> {
    let cert_key = RsaKeyPair::from_pem(private_key_pem)?;
    let rcgen_keypair = cert_key.to_rcgen_keypair()?;
    let mut cert_params =
        rcgen::CertificateParams::new(Vec::<String>::new()).context("CSR generation failed")?;
    let mut distinguished_name = rcgen::DistinguishedName::new();
    distinguished_name.push(rcgen::DnType::CommonName, common_name);
    cert_params.distinguished_name = distinguished_name;
    let csr = cert_params
        .serialize_request(&rcgen_keypair)
        .context("Signing CSR failed")?;
    Ok(csr.der().as_ref().to_vec())
}

pub fn der_to_pem(der: &[u8]) -> String {
    let pem = Pem::new("CERTIFICATE", der);
    pem::encode_config(&pem, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

pub fn load_certificates_from_memory<B: AsRef<[u8]>>(
    pem_bytes: B,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let reader = Cursor::new(pem_bytes);
    load_certificates_from_reader(reader, limit)
}

fn load_certificates_from_reader<R: BufRead + Seek>(
    reader: R,
    limit: Option<usize>,
) -> anyhow::Result<Vec<ParsedX509Certificate>> {
    let mut certificates = Vec::new();
    for pem in x509_parser::pem::Pem::iter_from_reader(reader)
        .take(limit.unwrap_or(DEFAULT_MAX_CERTIFICATE_CHAIN_LENGTH))
    {
        let pem = pem.context("Reading PEM block failed")?;
        let parsed_x509 = ParsedX509Certificate::try_from(pem.contents)?;
        certificates.push(parsed_x509);
    }
    Ok(certificates)
}

/// The point in time at which a certificate issued at `issued_at` should be renewed.
///
/// This is `issued_at` plus [`RENEW_AFTER`], pulled forward to `notAfter` minus
/// [`EXPIRY_SAFETY_MARGIN`] if the leaf certificate in `cert_pem` expires earlier. A leaf that
/// expires within the margin is renewed halfway through its remaining lifetime instead, and never
/// before `issued_at`. If the leaf cannot be parsed the uncapped value is used.
pub fn compute_renew_by(issued_at: OffsetDateTime, cert_pem: &str) -> OffsetDateTime {
    let renew_by = issued_at + RENEW_AFTER;
    match load_certificates_from_memory(cert_pem, Some(1)) {
        Ok(certificates) => match certificates.first() {
            Some(leaf) => {
                let latest = leaf.validity.not_after - EXPIRY_SAFETY_MARGIN;
                if latest < issued_at {
                    let not_after = leaf.validity.not_after;
                    warn!(
                        "Issued certificate expires at {not_after}, within the renewal safety margin"
                    );
                    issued_at.max(issued_at + (not_after - issued_at) / 2)
                } else {
                    renew_by.min(latest)
                }
            }
            None => {
                warn!("Issued certificate contains no PEM block, not capping renewal time");
                renew_by
            }
        },
        Err(e) => {
            warn!("Could not read expiry of issued certificate, not capping renewal time: {e:#}");
            renew_by
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedX509Certificate {
    pub subject: String,
    pub issuer: String,
    pub validity: Validity,
}

impl TryFrom<Vec<u8>> for ParsedX509Certificate {
    type Error = Error;

    fn try_from(der_bytes: Vec<u8>) -> anyhow::Result<ParsedX509Certificate> {
        let (_extra_bytes, cert) = x509_parser::certificate::X509Certificate::from_der(&der_bytes)
            .context("Reading X.509 structure: Decoding DER failed")?;
        Ok(Self {
            subject: cert.subject.to_string(),
            issuer: cert.issuer.to_string(),
            validity: (&cert.validity).into(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl From<&x509_parser::certificate::Validity> for Validity {
    fn from(value: &x509_parser::certificate::Validity) -> Self {
        Self {
            not_before: value.not_before.to_datetime(),
            not_after: value.not_after.to_datetime(),
        }
    }
}
