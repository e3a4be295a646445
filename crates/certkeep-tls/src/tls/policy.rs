use chrono::Duration;

use super::errors::TlsError;
use super::models::{CertificateRecord, UtcDateTime};

pub const DEFAULT_RENEWAL_LEAD_DAYS: i64 = 30;

/// Decides when a certificate becomes due for renewal.
///
/// The lead is applied once, when a certificate is issued, to fix the
/// record's `renew_time`. Later checks only compare against that deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    lead: Duration,
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        Self::new(Duration::days(DEFAULT_RENEWAL_LEAD_DAYS))
    }
}

impl RenewalPolicy {
    pub fn new(lead: Duration) -> Self {
        Self { lead }
    }

    /// Leads beyond what chrono can represent saturate; `renew_time` then
    /// reports the certificate as unusable instead of overflowing.
    pub fn from_days(days: i64) -> Self {
        Self::new(Duration::try_days(days).unwrap_or(Duration::MAX))
    }

    pub fn lead(&self) -> Duration {
        self.lead
    }

    pub fn renew_time(&self, not_after: UtcDateTime) -> Result<UtcDateTime, TlsError> {
        not_after.checked_sub_signed(self.lead).ok_or_else(|| {
            TlsError::InvalidCertificate(format!(
                "Renewal lead of {} days does not fit before {}",
                self.lead.num_days(),
                not_after
            ))
        })
    }

    /// True once `now` is strictly past the record's renewal deadline
    pub fn is_renewal_due(&self, now: UtcDateTime, record: &CertificateRecord) -> bool {
        now > record.renew_time
    }
}
