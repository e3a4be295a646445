use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use x509_parser::objects::{oid2sn, oid_registry};
use x509_parser::time::ASN1Time;

use super::errors::TlsError;
use super::policy::RenewalPolicy;

pub type UtcDateTime = DateTime<Utc>;

/// Metadata describing the certificate currently on disk.
///
/// Only `renew_time` drives renewal decisions; the descriptive fields are
/// kept for operators inspecting the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateRecord {
    pub version: u32,
    pub serial_number: String,
    pub signature_algorithm: String,
    pub issuer: String,
    pub subject: String,
    pub not_before: UtcDateTime,
    pub not_after: UtcDateTime,
    pub renew_time: UtcDateTime,
}

impl CertificateRecord {
    /// Build a record from the first certificate in a PEM chain, fixing the
    /// renewal deadline with `policy`.
    pub fn from_certificate_pem(pem: &str, policy: &RenewalPolicy) -> Result<Self, TlsError> {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
            .map_err(|e| TlsError::InvalidCertificate(format!("Failed to parse PEM: {}", e)))?;

        let x509 = pem
            .parse_x509()
            .map_err(|e| TlsError::InvalidCertificate(format!("Failed to parse X509: {}", e)))?;

        let sig_oid = &x509.signature_algorithm.algorithm;
        let signature_algorithm = oid2sn(sig_oid, oid_registry())
            .map(str::to_string)
            .unwrap_or_else(|_| sig_oid.to_id_string());

        let not_before = asn1_to_utc(&x509.validity().not_before)?;
        let not_after = asn1_to_utc(&x509.validity().not_after)?;

        Ok(CertificateRecord {
            version: x509.version().0 + 1,
            serial_number: x509.tbs_certificate.serial.to_string(),
            signature_algorithm,
            issuer: x509.issuer().to_string(),
            subject: x509.subject().to_string(),
            not_before,
            not_after,
            renew_time: policy.renew_time(not_after)?,
        })
    }

    pub fn days_until_expiry(&self, now: UtcDateTime) -> i64 {
        (self.not_after - now).num_days()
    }

    /// Parse a stored record, accepting the layout written by earlier
    /// releases as well
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_str(json)? {
            StoredRecord::Current(record) => record,
            StoredRecord::Legacy(legacy) => legacy.into(),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(CertificateRecord),
    Legacy(LegacyRecord),
}

/// PascalCase keys with the validity window nested
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyRecord {
    version: u32,
    serial_number: String,
    signature_algorithm: String,
    issuer: String,
    validity: LegacyValidity,
    subject: String,
    renew_time: UtcDateTime,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LegacyValidity {
    not_before: UtcDateTime,
    not_after: UtcDateTime,
}

impl From<LegacyRecord> for CertificateRecord {
    fn from(legacy: LegacyRecord) -> Self {
        CertificateRecord {
            version: legacy.version,
            serial_number: legacy.serial_number,
            signature_algorithm: legacy.signature_algorithm,
            issuer: legacy.issuer,
            subject: legacy.subject,
            not_before: legacy.validity.not_before,
            not_after: legacy.validity.not_after,
            renew_time: legacy.renew_time,
        }
    }
}

fn asn1_to_utc(time: &ASN1Time) -> Result<UtcDateTime, TlsError> {
    Utc.timestamp_opt(time.timestamp(), 0)
        .single()
        .ok_or_else(|| TlsError::InvalidCertificate("Invalid validity timestamp".to_string()))
}

/// Artifacts produced by one successful issuance.
///
/// `certificate_pem` is the chain as served by the authority with the leaf
/// first; `issuer_pem` is that chain without the leaf.
#[derive(Clone)]
pub struct CertificateBundle {
    pub certificate_pem: String,
    pub private_key_pem: String,
    pub issuer_pem: String,
}

impl std::fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("certificate_pem", &self.certificate_pem.len())
            .field("private_key_pem", &"<redacted>")
            .field("issuer_pem", &self.issuer_pem.len())
            .finish()
    }
}

impl CertificateBundle {
    /// Split a PEM chain into the bundle layout: full chain, and issuers only
    pub fn from_chain(chain_pem: &str, private_key_pem: String) -> Self {
        const END_MARKER: &str = "-----END CERTIFICATE-----";

        let issuer_pem = match chain_pem.find(END_MARKER) {
            Some(idx) => chain_pem[idx + END_MARKER.len()..].trim_start().to_string(),
            None => String::new(),
        };

        Self {
            certificate_pem: chain_pem.to_string(),
            private_key_pem,
            issuer_pem,
        }
    }
}

/// Result of one renewal attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The stored certificate is not due yet; nothing was touched
    NotDue { renew_time: UtcDateTime },

    /// A new certificate was issued and recorded
    Issued {
        record: CertificateRecord,
        first_issuance: bool,
    },
}
