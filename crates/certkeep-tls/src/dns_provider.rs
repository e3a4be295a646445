use anyhow::Result;
use async_trait::async_trait;
use cloudflare::endpoints::{dns, zones};
use cloudflare::framework::{
    auth::Credentials, client::async_api::Client, client::ClientConfig, Environment,
};
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Publishes the TXT records that answer DNS-01 challenges
#[async_trait]
pub trait DnsProviderService: Send + Sync {
    /// Make `value` the only TXT value published at `name` within `domain`'s zone
    async fn set_txt_record(&self, domain: &str, name: &str, value: &str) -> Result<()>;

    /// Remove every TXT value published at `name`
    async fn remove_txt_record(&self, domain: &str, name: &str) -> Result<()>;
}

/// Looks up TXT records the way the ACME server will see them
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn txt_values(&self, name: &str) -> Result<Vec<String>>;
}

/// Queries Cloudflare's public resolvers (1.1.1.1) directly
pub struct CloudflareTxtResolver {
    resolver: TokioAsyncResolver,
}

impl Default for CloudflareTxtResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudflareTxtResolver {
    pub fn new() -> Self {
        let mut options = ResolverOpts::default();
        options.try_tcp_on_error = true;
        options.use_hosts_file = false;
        // a cached NXDOMAIN would hide the record for the whole wait
        options.negative_max_ttl = Some(Duration::from_secs(1));

        let resolver = TokioAsyncResolver::tokio(ResolverConfig::cloudflare(), options);
        Self { resolver }
    }
}

#[async_trait]
impl TxtResolver for CloudflareTxtResolver {
    async fn txt_values(&self, name: &str) -> Result<Vec<String>> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| anyhow::anyhow!("TXT lookup for {} failed: {}", name, e))?;

        Ok(lookup
            .iter()
            .map(|record| {
                record
                    .txt_data()
                    .iter()
                    .map(|data| String::from_utf8_lossy(data).to_string())
                    .collect::<String>()
            })
            .collect())
    }
}

/// Zone name for a domain: its last two labels
pub fn extract_base_domain(domain: &str) -> String {
    let labels: Vec<&str> = domain.trim_end_matches('.').split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

fn relative_record_name(name: &str, base_domain: &str) -> String {
    name.strip_suffix(&format!(".{}", base_domain))
        .unwrap_or(name)
        .to_string()
}

pub struct CloudflareDnsProvider {
    client: Client,
}

impl CloudflareDnsProvider {
    pub fn new(api_token: String) -> Result<Self> {
        let credentials = Credentials::UserAuthToken { token: api_token };
        let client = Client::new(credentials, ClientConfig::default(), Environment::Production)
            .map_err(|e| anyhow::anyhow!("Failed to create Cloudflare client: {:?}", e))?;

        Ok(Self { client })
    }

    async fn get_zone_id(&self, domain: &str) -> Result<String> {
        let base_domain = extract_base_domain(domain);

        debug!("Fetching zone ID for base domain: {}", base_domain);
        let endpoint = zones::zone::ListZones {
            params: zones::zone::ListZonesParams {
                name: Some(base_domain.clone()),
                ..Default::default()
            },
        };

        let response = self
            .client
            .request(&endpoint)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list zones: {:?}", e))?;

        response
            .result
            .first()
            .map(|zone| zone.id.to_string())
            .ok_or_else(|| anyhow::anyhow!("Zone not found for {}", base_domain))
    }

    async fn get_txt_records(&self, zone_id: &str, full_name: &str) -> Result<Vec<dns::dns::DnsRecord>> {
        // Filtering by record type server-side needs a dummy content value,
        // so filter on name only and keep the TXT records here
        let endpoint = dns::dns::ListDnsRecords {
            zone_identifier: zone_id,
            params: dns::dns::ListDnsRecordsParams {
                name: Some(full_name.to_string()),
                ..Default::default()
            },
        };

        let response = self
            .client
            .request(&endpoint)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to list TXT records: {:?}", e))?;

        let records: Vec<_> = response
            .result
            .into_iter()
            .filter(|r| matches!(r.content, dns::dns::DnsContent::TXT { .. }))
            .collect();

        debug!("Found {} TXT record(s) for {}", records.len(), full_name);
        Ok(records)
    }

    async fn delete_record(&self, zone_id: &str, record: &dns::dns::DnsRecord) {
        let endpoint = dns::dns::DeleteDnsRecord {
            zone_identifier: zone_id,
            identifier: &record.id,
        };
        match self.client.request(&endpoint).await {
            Ok(_) => debug!("Removed TXT record {} ({})", record.name, record.id),
            Err(e) => warn!("Failed to remove TXT record {}: {:?}", record.id, e),
        }
    }
}

#[async_trait]
impl DnsProviderService for CloudflareDnsProvider {
    async fn set_txt_record(&self, domain: &str, name: &str, value: &str) -> Result<()> {
        let zone_id = self.get_zone_id(domain).await?;
        let existing = self.get_txt_records(&zone_id, name).await?;

        let mut already_published = false;
        for record in &existing {
            if let dns::dns::DnsContent::TXT { content } = &record.content {
                if content == value {
                    already_published = true;
                } else {
                    info!("Removing stale TXT record {} = {}", name, content);
                    self.delete_record(&zone_id, record).await;
                }
            }
        }

        if already_published {
            info!("TXT record {} already has the expected value", name);
            return Ok(());
        }

        let relative_name = relative_record_name(name, &extract_base_domain(domain));
        let endpoint = dns::dns::CreateDnsRecord {
            zone_identifier: &zone_id,
            params: dns::dns::CreateDnsRecordParams {
                name: &relative_name,
                content: dns::dns::DnsContent::TXT {
                    content: value.to_string(),
                },
                ttl: Some(120),
                priority: None,
                proxied: None,
            },
        };

        self.client
            .request(&endpoint)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create TXT record {}: {:?}", name, e))?;

        info!("Created TXT record {}", name);
        Ok(())
    }

    async fn remove_txt_record(&self, domain: &str, name: &str) -> Result<()> {
        let zone_id = self.get_zone_id(domain).await?;
        let records = self.get_txt_records(&zone_id, name).await?;

        if records.is_empty() {
            debug!("No TXT records to remove for {}", name);
            return Ok(());
        }

        for record in &records {
            self.delete_record(&zone_id, record).await;
        }
        info!("Removed TXT records for {}", name);
        Ok(())
    }
}

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::RwLock;

    /// Keeps published TXT values in memory
    #[derive(Default)]
    pub struct RecordingDnsProvider {
        records: Arc<RwLock<HashMap<String, String>>>,
        removals: Arc<RwLock<Vec<String>>>,
    }

    impl RecordingDnsProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn value(&self, name: &str) -> Option<String> {
            self.records.read().await.get(name).cloned()
        }

        pub async fn removals(&self) -> Vec<String> {
            self.removals.read().await.clone()
        }
    }

    #[async_trait]
    impl DnsProviderService for RecordingDnsProvider {
        async fn set_txt_record(&self, _domain: &str, name: &str, value: &str) -> Result<()> {
            self.records
                .write()
                .await
                .insert(name.to_string(), value.to_string());
            Ok(())
        }

        async fn remove_txt_record(&self, _domain: &str, name: &str) -> Result<()> {
            self.records.write().await.remove(name);
            self.removals.write().await.push(name.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::RecordingDnsProvider;
    use super::*;

    #[test]
    fn test_extract_base_domain() {
        assert_eq!(extract_base_domain("example.com"), "example.com");
        assert_eq!(extract_base_domain("www.example.com"), "example.com");
        assert_eq!(extract_base_domain("_acme-challenge.a.b.example.com"), "example.com");
        assert_eq!(extract_base_domain("example.com."), "example.com");
        assert_eq!(extract_base_domain("localhost"), "localhost");
    }

    #[test]
    fn test_relative_record_name() {
        assert_eq!(
            relative_record_name("_acme-challenge.www.example.com", "example.com"),
            "_acme-challenge.www"
        );
        assert_eq!(
            relative_record_name("_acme-challenge", "example.com"),
            "_acme-challenge"
        );
    }

    #[test]
    fn test_cloudflare_provider_builds_without_network() {
        assert!(CloudflareDnsProvider::new("token".to_string()).is_ok());
    }

    #[tokio::test]
    async fn test_recording_provider_replaces_and_removes() {
        let dns = RecordingDnsProvider::new();
        let name = "_acme-challenge.example.com";

        dns.set_txt_record("example.com", name, "first").await.unwrap();
        dns.set_txt_record("example.com", name, "second").await.unwrap();
        assert_eq!(dns.value(name).await.as_deref(), Some("second"));

        dns.remove_txt_record("example.com", name).await.unwrap();
        assert_eq!(dns.value(name).await, None);
        assert_eq!(dns.removals().await, vec![name.to_string()]);
    }
}
