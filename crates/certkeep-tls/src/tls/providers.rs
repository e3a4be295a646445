use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType as AcmeChallengeType,
    Identifier, NewAccount, NewOrder, Order, OrderStatus,
};
use rcgen::{CertificateParams, DistinguishedName, KeyPair};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::atomic::write_private_file;
use super::errors::AuthorityError;
use super::models::CertificateBundle;
use crate::dns_provider::{DnsProviderService, TxtResolver};

/// Obtains a freshly issued certificate for a domain.
///
/// Implementations are called at most once per renewal attempt and are not
/// retried by the caller; any error abandons the attempt.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn obtain_certificate(
        &self,
        domain: &str,
        email: &str,
    ) -> Result<CertificateBundle, AuthorityError>;
}

/// How long a published TXT value may take to show up on public resolvers
pub const DEFAULT_PROPAGATION_TIMEOUT: Duration = Duration::from_secs(120);

const PROPAGATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

const CERTIFICATE_POLL_ATTEMPTS: u32 = 30;

/// ACME directory for Let's Encrypt
pub fn lets_encrypt_directory(staging: bool) -> &'static str {
    if staging {
        instant_acme::LetsEncrypt::Staging.url()
    } else {
        instant_acme::LetsEncrypt::Production.url()
    }
}

/// DNS-01 TXT value: base64url(SHA-256(key authorization)), unpadded
pub fn dns01_txt_value(key_authorization: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn challenge_record_name(domain: &str) -> String {
    format!("_acme-challenge.{}", domain)
}

/// TXT records published during one order. Every name is remembered before
/// the write is attempted, so a half-applied write is still removed.
#[derive(Clone)]
struct ChallengeRecords {
    dns: Arc<dyn DnsProviderService>,
    domain: String,
    names: Arc<Mutex<Vec<String>>>,
}

impl ChallengeRecords {
    fn new(dns: Arc<dyn DnsProviderService>, domain: &str) -> Self {
        Self {
            dns,
            domain: domain.to_string(),
            names: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn publish(&self, name: &str, value: &str) -> Result<(), AuthorityError> {
        {
            let mut names = self.names.lock().await;
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        self.dns.set_txt_record(&self.domain, name, value).await?;
        Ok(())
    }

    async fn remove_all(&self) {
        let names = std::mem::take(&mut *self.names.lock().await);
        for name in &names {
            if let Err(e) = self.dns.remove_txt_record(&self.domain, name).await {
                warn!("Failed to clean up challenge record {}: {}", name, e);
            }
        }
    }
}

/// Run `step` and then remove whatever challenge records it published,
/// whether it succeeded or not
async fn with_challenge_cleanup<T, F, Fut>(
    records: ChallengeRecords,
    step: F,
) -> Result<T, AuthorityError>
where
    F: FnOnce(ChallengeRecords) -> Fut,
    Fut: Future<Output = Result<T, AuthorityError>>,
{
    let result = step(records.clone()).await;
    records.remove_all().await;
    result
}

/// Poll `resolver` until `value` is published at `name`
async fn wait_for_txt_value(
    resolver: &dyn TxtResolver,
    name: &str,
    value: &str,
    timeout: Duration,
) -> Result<(), AuthorityError> {
    let deadline = Instant::now() + timeout;
    let mut lookups = 0u32;

    loop {
        lookups += 1;
        match resolver.txt_values(name).await {
            Ok(values) if values.iter().any(|v| v == value) => {
                info!("TXT record {} is visible after {} lookup(s)", name, lookups);
                return Ok(());
            }
            Ok(values) => debug!(
                "TXT record {} not visible yet ({} other value(s))",
                name,
                values.len()
            ),
            // NXDOMAIN until the zone picks up the record
            Err(e) => debug!("{}", e),
        }

        if Instant::now() + PROPAGATION_POLL_INTERVAL > deadline {
            return Err(AuthorityError::Dns(format!(
                "TXT record {} was not visible after {}s",
                name,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(PROPAGATION_POLL_INTERVAL).await;
    }
}

/// ACME client that proves control of the domain through DNS-01
pub struct LetsEncryptProvider {
    directory_url: String,
    dns: Arc<dyn DnsProviderService>,
    resolver: Arc<dyn TxtResolver>,
    account_path: Option<PathBuf>,
    propagation_timeout: Duration,
}

impl LetsEncryptProvider {
    /// `resolver` is asked whether published challenge values are visible
    /// before the server is told to validate them
    pub fn new(
        directory_url: impl Into<String>,
        dns: Arc<dyn DnsProviderService>,
        resolver: Arc<dyn TxtResolver>,
    ) -> Self {
        Self {
            directory_url: directory_url.into(),
            dns,
            resolver,
            account_path: None,
            propagation_timeout: DEFAULT_PROPAGATION_TIMEOUT,
        }
    }

    /// Reuse the account stored at `path`, registering and saving one there
    /// if the file does not exist yet
    pub fn with_account_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.account_path = Some(path.into());
        self
    }

    pub fn with_propagation_timeout(mut self, timeout: Duration) -> Self {
        self.propagation_timeout = timeout;
        self
    }

    pub fn directory_url(&self) -> &str {
        &self.directory_url
    }

    async fn load_account_credentials(&self) -> Result<Option<AccountCredentials>, AuthorityError> {
        let Some(path) = &self.account_path else {
            return Ok(None);
        };

        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let credentials = serde_json::from_str(&content).map_err(|e| {
                    AuthorityError::Configuration(format!(
                        "Failed to deserialize account {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(Some(credentials))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AuthorityError::Configuration(format!(
                "Failed to read account {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn save_account_credentials(
        &self,
        credentials: &AccountCredentials,
    ) -> Result<(), AuthorityError> {
        let Some(path) = self.account_path.clone() else {
            return Ok(());
        };

        let json = serde_json::to_vec_pretty(credentials).map_err(|e| {
            AuthorityError::Configuration(format!("Failed to serialize account: {}", e))
        })?;

        tokio::task::spawn_blocking(move || write_private_file(&path, &json))
            .await
            .map_err(|e| AuthorityError::Configuration(e.to_string()))?
            .map_err(|e| AuthorityError::Configuration(e.to_string()))
    }

    async fn get_or_create_account(&self, email: &str) -> Result<Account, AuthorityError> {
        if let Some(credentials) = self.load_account_credentials().await? {
            debug!("Using stored ACME account");
            return Ok(Account::from_credentials(credentials).await?);
        }

        info!(
            "Registering ACME account for {} at {}",
            email, self.directory_url
        );
        let contact = format!("mailto:{}", email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact.as_str()],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await?;

        self.save_account_credentials(&credentials).await?;
        Ok(account)
    }

    /// Publish a TXT record for every pending authorization, wait until
    /// public resolvers return it, then tell the server to validate
    async fn answer_challenges(
        &self,
        domain: &str,
        order: &mut Order,
        records: &ChallengeRecords,
    ) -> Result<(), AuthorityError> {
        let authorizations = order.authorizations().await?;
        let mut pending = Vec::new();

        for authz in &authorizations {
            if authz.status == AuthorizationStatus::Valid {
                continue;
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == AcmeChallengeType::Dns01)
                .ok_or_else(|| {
                    AuthorityError::Challenge("No DNS-01 challenge offered".to_string())
                })?;

            let key_auth = order.key_authorization(challenge);
            let txt_value = dns01_txt_value(key_auth.as_str());
            let record_name = challenge_record_name(domain);

            records.publish(&record_name, &txt_value).await?;
            pending.push((challenge.url.clone(), record_name, txt_value));
        }

        if pending.is_empty() {
            return Ok(());
        }

        info!(
            "Waiting up to {}s for DNS propagation of {} challenge record(s)",
            self.propagation_timeout.as_secs(),
            pending.len()
        );
        for (_, name, value) in &pending {
            wait_for_txt_value(self.resolver.as_ref(), name, value, self.propagation_timeout)
                .await?;
        }

        for (url, _, _) in &pending {
            debug!("Setting challenge ready: {}", url);
            order.set_challenge_ready(url).await?;
        }
        Ok(())
    }

    async fn wait_for_order_ready(&self, order: &mut Order) -> Result<(), AuthorityError> {
        const MAX_ATTEMPTS: u32 = 6;
        const BASE_DELAY_SECS: u64 = 1;
        const MAX_DELAY_SECS: u64 = 30;

        for attempt in 1..=MAX_ATTEMPTS {
            // 1s, 2s, 4s, 8s, 16s, 30s
            let delay_secs = std::cmp::min(BASE_DELAY_SECS << (attempt - 1), MAX_DELAY_SECS);
            tokio::time::sleep(Duration::from_secs(delay_secs)).await;
            let state = order.refresh().await?;

            match state.status {
                OrderStatus::Ready | OrderStatus::Valid => {
                    info!("Order is ready after {} attempt(s)", attempt);
                    return Ok(());
                }
                OrderStatus::Invalid => {
                    let error_msg = format!("Order validation failed after {} attempt(s)", attempt);
                    error!("{}", error_msg);
                    return Err(AuthorityError::Challenge(error_msg));
                }
                _ => debug!(
                    "Order not ready yet (attempt {}/{})",
                    attempt, MAX_ATTEMPTS
                ),
            }
        }

        let error_msg = format!("Order validation timed out after {} attempts", MAX_ATTEMPTS);
        error!("{}", error_msg);
        Err(AuthorityError::Challenge(error_msg))
    }

    async fn finalize_order(
        &self,
        domain: &str,
        order: &mut Order,
    ) -> Result<CertificateBundle, AuthorityError> {
        let mut params = CertificateParams::new(vec![domain.to_string()])?;
        params.distinguished_name = DistinguishedName::new();

        let private_key = KeyPair::generate()?;
        let csr = params.serialize_request(&private_key)?;

        order.finalize(csr.der()).await?;

        let mut chain_pem = None;
        for _ in 0..CERTIFICATE_POLL_ATTEMPTS {
            match order.certificate().await? {
                Some(chain) => {
                    chain_pem = Some(chain);
                    break;
                }
                None => tokio::time::sleep(Duration::from_secs(1)).await,
            }
        }

        let chain_pem = chain_pem.ok_or_else(|| {
            AuthorityError::Acme(format!(
                "Certificate for {} was not available after finalizing",
                domain
            ))
        })?;

        Ok(CertificateBundle::from_chain(
            &chain_pem,
            private_key.serialize_pem(),
        ))
    }

    async fn complete_order(
        &self,
        domain: &str,
        order: &mut Order,
        records: &ChallengeRecords,
    ) -> Result<CertificateBundle, AuthorityError> {
        if order.state().status == OrderStatus::Ready {
            info!("Order for {} is already ready", domain);
        } else {
            self.answer_challenges(domain, order, records).await?;
            self.wait_for_order_ready(order).await?;
        }

        self.finalize_order(domain, order).await
    }
}

#[async_trait]
impl CertificateAuthority for LetsEncryptProvider {
    async fn obtain_certificate(
        &self,
        domain: &str,
        email: &str,
    ) -> Result<CertificateBundle, AuthorityError> {
        info!("Requesting certificate for {}", domain);

        let account = self.get_or_create_account(email).await?;
        let identifiers = [Identifier::Dns(domain.to_string())];
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await?;

        let records = ChallengeRecords::new(self.dns.clone(), domain);
        let result = with_challenge_cleanup(records, |records| async move {
            self.complete_order(domain, &mut order, &records).await
        })
        .await;

        if result.is_ok() {
            info!("Certificate issued for {}", domain);
        }
        result
    }
}
