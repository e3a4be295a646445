use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::errors::TlsError;
use super::models::RenewalOutcome;
use super::service::RenewalService;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Re-runs the renewal check on a fixed interval until cancelled
pub struct RenewalScheduler {
    service: Arc<RenewalService>,
    interval: Duration,
}

impl RenewalScheduler {
    pub fn new(service: Arc<RenewalService>, interval: Duration) -> Self {
        Self { service, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep one interval, run a check, repeat. A failed check is logged and
    /// the loop carries on; the next tick is the retry.
    pub async fn run(&self, cancellation_token: CancellationToken) -> Result<(), TlsError> {
        info!(
            "Starting renewal scheduler for {} (every {}s)",
            self.service.domain(),
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = cancellation_token.cancelled() => {
                    info!("Renewal scheduler received cancellation signal");
                    return Ok(());
                }
            }

            tokio::select! {
                result = self.service.run_once() => match result {
                    Ok(RenewalOutcome::NotDue { renew_time }) => {
                        debug!("Scheduled check: not due until {}", renew_time);
                    }
                    Ok(RenewalOutcome::Issued { record, .. }) => {
                        info!("Scheduled check renewed certificate, valid until {}", record.not_after);
                    }
                    Err(e) => {
                        error!("Scheduled renewal check for {} failed: {}", self.service.domain(), e);
                    }
                },
                _ = cancellation_token.cancelled() => {
                    info!("Renewal scheduler cancelled during a check");
                    return Ok(());
                }
            }
        }
    }
}
