//! Certificate renewal for a single domain: expiry tracking, ACME issuance
//! over DNS-01 and durable storage of the result

pub mod dns_provider;
pub mod tls;

pub use dns_provider::{
    CloudflareDnsProvider, CloudflareTxtResolver, DnsProviderService, TxtResolver,
};

pub use tls::{
    CertificateAuthority, CertificateBundle, CertificateFileSink, CertificateRecord,
    CertificateRecordStore, FileRecordStore, LetsEncryptProvider, RenewalOutcome, RenewalPolicy,
    RenewalScheduler, RenewalService, RenewalServiceBuilder, TlsError,
};
