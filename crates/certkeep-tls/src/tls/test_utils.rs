//! Fixtures shared by the tls unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;

use super::errors::AuthorityError;
use super::models::{CertificateBundle, CertificateRecord, UtcDateTime};
use super::providers::CertificateAuthority;

pub fn utc(year: i32, month: u32, day: u32) -> UtcDateTime {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn record_with_renew_time(renew_time: UtcDateTime) -> CertificateRecord {
    CertificateRecord {
        version: 3,
        serial_number: "42".to_string(),
        signature_algorithm: "ecdsa-with-SHA256".to_string(),
        issuer: "CN=Test CA".to_string(),
        subject: "CN=example.com".to_string(),
        not_before: renew_time - chrono::Duration::days(60),
        not_after: renew_time + chrono::Duration::days(30),
        renew_time,
    }
}

/// Issue a real self-signed certificate with the given validity window
pub fn self_signed_bundle(
    domain: &str,
    not_before: UtcDateTime,
    not_after: UtcDateTime,
) -> CertificateBundle {
    let mut params = CertificateParams::new(vec![domain.to_string()]).unwrap();
    params.distinguished_name = DistinguishedName::new();
    params.distinguished_name.push(DnType::CommonName, domain);
    params.not_before = OffsetDateTime::from_unix_timestamp(not_before.timestamp()).unwrap();
    params.not_after = OffsetDateTime::from_unix_timestamp(not_after.timestamp()).unwrap();

    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();

    CertificateBundle {
        certificate_pem: cert.pem(),
        private_key_pem: key_pair.serialize_pem(),
        issuer_pem: cert.pem(),
    }
}

/// Authority that hands out a fresh certificate with a fixed validity window
pub struct StaticAuthority {
    not_before: UtcDateTime,
    not_after: UtcDateTime,
    calls: AtomicUsize,
}

impl StaticAuthority {
    pub fn new(not_before: UtcDateTime, not_after: UtcDateTime) -> Self {
        Self {
            not_before,
            not_after,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for StaticAuthority {
    async fn obtain_certificate(
        &self,
        domain: &str,
        _email: &str,
    ) -> Result<CertificateBundle, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self_signed_bundle(domain, self.not_before, self.not_after))
    }
}

/// Authority that always fails with a rate-limit error
#[derive(Default)]
pub struct FailingAuthority {
    calls: AtomicUsize,
}

impl FailingAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CertificateAuthority for FailingAuthority {
    async fn obtain_certificate(
        &self,
        domain: &str,
        _email: &str,
    ) -> Result<CertificateBundle, AuthorityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AuthorityError::RateLimited(format!(
            "too many certificates already issued for {}",
            domain
        )))
    }
}
