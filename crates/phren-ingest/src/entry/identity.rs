//! Signer identity extraction
//!
//! Turns the public key embedded in a log entry into something a human can
//! search for: the User IDs of a PGP key ring, or a summary of an X.509
//! signing certificate restricted to provenance-relevant extensions.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::pem::parse_x509_pem;

use super::keyring;
use crate::error::IdentityError;

/// Signature format tag that selects the PGP path; everything else is X.509
pub const FORMAT_PGP: &str = "pgp";
pub const FORMAT_X509: &str = "x509";

/// Extensions kept in [`X509Identity::extensions`]; all others are dropped
pub const EXTENSION_ALLOW_LIST: &[&str] = &[
    OID_SUBJECT_ALT_NAME,
    OID_FULCIO_ISSUER,
    OID_FULCIO_GITHUB_WORKFLOW_TRIGGER,
    OID_FULCIO_GITHUB_WORKFLOW_SHA,
    OID_FULCIO_GITHUB_WORKFLOW_NAME,
    OID_FULCIO_GITHUB_WORKFLOW_REPOSITORY,
    OID_FULCIO_GITHUB_WORKFLOW_REF,
];

pub const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";
pub const OID_FULCIO_ISSUER: &str = "1.3.6.1.4.1.57264.1.1";
pub const OID_FULCIO_GITHUB_WORKFLOW_TRIGGER: &str = "1.3.6.1.4.1.57264.1.2";
pub const OID_FULCIO_GITHUB_WORKFLOW_SHA: &str = "1.3.6.1.4.1.57264.1.3";
pub const OID_FULCIO_GITHUB_WORKFLOW_NAME: &str = "1.3.6.1.4.1.57264.1.4";
pub const OID_FULCIO_GITHUB_WORKFLOW_REPOSITORY: &str = "1.3.6.1.4.1.57264.1.5";
pub const OID_FULCIO_GITHUB_WORKFLOW_REF: &str = "1.3.6.1.4.1.57264.1.6";

/// Who signed an entry, as far as the embedded key tells us
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Identity {
    /// User IDs of every key in the ring, duplicates included
    Pgp(Vec<String>),
    X509(X509Identity),
    #[default]
    None,
}

impl Identity {
    /// Flat text form kept for older consumers of the store
    pub fn legacy_text(&self) -> String {
        match self {
            Identity::Pgp(names) => names.concat(),
            Identity::X509(cert) => cert.issuer_common_name.clone().unwrap_or_default(),
            Identity::None => String::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Identity::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509Identity {
    /// 1-based, so a v3 certificate reports 3
    pub version: u32,
    /// Decimal
    pub serial_number: String,
    pub signature_algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_common_name: Option<String>,
    pub validity_not_before: DateTime<Utc>,
    pub validity_not_after: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extensions: Vec<CertificateExtension>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateExtension {
    pub oid: String,
    /// Raw DER octets of the extension value, base64
    pub value: String,
}

/// Derive an identity from decoded key bytes
///
/// `format == "pgp"` reads an armored key ring; any other format is treated
/// as a PEM certificate.
pub fn extract_identity(public_key: &[u8], format: &str) -> Result<Identity, IdentityError> {
    if format == FORMAT_PGP {
        let armored = String::from_utf8_lossy(public_key);
        return keyring::user_ids(&armored).map(Identity::Pgp);
    }
    x509_identity(public_key).map(Identity::X509)
}

fn x509_identity(pem_bytes: &[u8]) -> Result<X509Identity, IdentityError> {
    let (_, pem) = parse_x509_pem(pem_bytes).map_err(|e| IdentityError::Pem(e.to_string()))?;
    if pem.label != "CERTIFICATE" {
        return Err(IdentityError::Pem(format!(
            "expected a CERTIFICATE block, found {}",
            pem.label
        )));
    }
    let cert = pem
        .parse_x509()
        .map_err(|e| IdentityError::Certificate(e.to_string()))?;

    let issuer = cert.issuer();
    let issuer_organization = issuer
        .iter_organization()
        .find_map(|attr| attr.as_str().ok())
        .map(str::to_string);
    let issuer_common_name = issuer
        .iter_common_name()
        .find_map(|attr| attr.as_str().ok())
        .map(str::to_string);

    let validity = cert.validity();
    let validity_not_before = timestamp(validity.not_before.timestamp())?;
    let validity_not_after = timestamp(validity.not_after.timestamp())?;

    let extensions = cert
        .extensions()
        .iter()
        .filter_map(|ext| {
            let oid = ext.oid.to_id_string();
            EXTENSION_ALLOW_LIST
                .contains(&oid.as_str())
                .then(|| CertificateExtension {
                    oid,
                    value: STANDARD.encode(ext.value),
                })
        })
        .collect();

    Ok(X509Identity {
        version: cert.version().0 + 1,
        serial_number: cert.tbs_certificate.serial.to_string(),
        signature_algorithm: signature_algorithm_name(&cert.signature_algorithm.algorithm.to_id_string()),
        issuer_organization,
        issuer_common_name,
        validity_not_before,
        validity_not_after,
        extensions,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, IdentityError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| IdentityError::Certificate(format!("validity timestamp {secs} out of range")))
}

/// Conventional name for a signature algorithm OID, or the dotted OID itself
pub fn signature_algorithm_name(oid: &str) -> String {
    let name = match oid {
        "1.2.840.113549.1.1.2" => "MD2-RSA",
        "1.2.840.113549.1.1.4" => "MD5-RSA",
        "1.2.840.113549.1.1.5" => "SHA1-RSA",
        "1.2.840.113549.1.1.11" => "SHA256-RSA",
        "1.2.840.113549.1.1.12" => "SHA384-RSA",
        "1.2.840.113549.1.1.13" => "SHA512-RSA",
        "1.2.840.113549.1.1.10" => "SHA256-RSAPSS",
        "1.2.840.10040.4.3" => "DSA-SHA1",
        "2.16.840.1.101.3.4.3.2" => "DSA-SHA256",
        "1.2.840.10045.4.1" => "ECDSA-SHA1",
        "1.2.840.10045.4.3.2" => "ECDSA-SHA256",
        "1.2.840.10045.4.3.3" => "ECDSA-SHA384",
        "1.2.840.10045.4.3.4" => "ECDSA-SHA512",
        "1.3.101.112" => "Ed25519",
        other => return other.to_string(),
    };
    name.to_string()
}
