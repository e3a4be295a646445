use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use super::errors::{BuilderError, TlsError};
use super::models::{CertificateBundle, CertificateRecord, RenewalOutcome, UtcDateTime};
use super::policy::RenewalPolicy;
use super::providers::CertificateAuthority;
use super::repository::CertificateRecordStore;
use super::sink::CertificateFileSink;

/// Runs single renewal attempts for one domain.
///
/// An attempt checks for a stored record, decides whether it is due, and
/// when it is (or when there is no record at all) obtains a new certificate,
/// writes the artifacts and replaces the record. Nothing is kept in memory
/// between attempts.
pub struct RenewalService {
    store: Arc<dyn CertificateRecordStore>,
    authority: Arc<dyn CertificateAuthority>,
    sink: CertificateFileSink,
    policy: RenewalPolicy,
    domain: String,
    email: String,
}

impl RenewalService {
    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub async fn run_once(&self) -> Result<RenewalOutcome, TlsError> {
        self.run_at(Utc::now()).await
    }

    pub async fn run_at(&self, now: UtcDateTime) -> Result<RenewalOutcome, TlsError> {
        let first_issuance = !self.store.exists().await?;

        if first_issuance {
            info!(
                "No certificate record for {}, requesting a first certificate",
                self.domain
            );
        } else {
            let record = self.store.load().await?;
            if !self.policy.is_renewal_due(now, &record) {
                info!(
                    "Certificate for {} is valid until {}, next renewal after {}",
                    self.domain, record.not_after, record.renew_time
                );
                return Ok(RenewalOutcome::NotDue {
                    renew_time: record.renew_time,
                });
            }
            info!(
                "Certificate for {} is due for renewal (renew time {}, expires in {} days)",
                self.domain,
                record.renew_time,
                record.days_until_expiry(now)
            );
        }

        let bundle = self
            .authority
            .obtain_certificate(&self.domain, &self.email)
            .await?;
        let record = self.persist(bundle).await?;

        info!(
            "Certificate for {} renewed: serial {}, valid until {}, next renewal after {}",
            self.domain, record.serial_number, record.not_after, record.renew_time
        );
        Ok(RenewalOutcome::Issued {
            record,
            first_issuance,
        })
    }

    /// Artifacts land before the record, and only once the new certificate
    /// has been parsed into its record. The writes run on their own task so
    /// that dropping the attempt cannot separate them.
    async fn persist(&self, bundle: CertificateBundle) -> Result<CertificateRecord, TlsError> {
        let record = CertificateRecord::from_certificate_pem(&bundle.certificate_pem, &self.policy)?;

        let store = self.store.clone();
        let sink = self.sink.clone();
        let domain = self.domain.clone();
        tokio::spawn(async move {
            let staged = sink.stage(&bundle).await?;
            staged.commit().await?;
            debug!("Certificate artifacts for {} committed", domain);

            store.save(&record).await?;
            Ok::<_, TlsError>(record)
        })
        .await
        .map_err(|e| TlsError::Internal(format!("Persisting certificate failed: {}", e)))?
    }
}

pub struct RenewalServiceBuilder {
    store: Option<Arc<dyn CertificateRecordStore>>,
    authority: Option<Arc<dyn CertificateAuthority>>,
    sink: Option<CertificateFileSink>,
    policy: RenewalPolicy,
    domain: Option<String>,
    email: Option<String>,
}

impl Default for RenewalServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RenewalServiceBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            authority: None,
            sink: None,
            policy: RenewalPolicy::default(),
            domain: None,
            email: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CertificateRecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_authority(mut self, authority: Arc<dyn CertificateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    pub fn with_sink(mut self, sink: CertificateFileSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn build(self) -> Result<RenewalService, BuilderError> {
        Ok(RenewalService {
            store: self.store.ok_or(BuilderError::MissingStore)?,
            authority: self.authority.ok_or(BuilderError::MissingAuthority)?,
            sink: self.sink.ok_or(BuilderError::MissingSink)?,
            policy: self.policy,
            domain: self.domain.ok_or(BuilderError::MissingDomain)?,
            email: self.email.ok_or(BuilderError::MissingEmail)?,
        })
    }
}
