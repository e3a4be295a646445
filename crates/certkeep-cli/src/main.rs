//! certkeep - keeps the TLS certificate of one domain renewed
//!
//! Runs one renewal check at startup, then re-checks on a fixed interval
//! until interrupted.

mod logging;

use anyhow::Context;
use certkeep_config::{AcmeEnvironment, CertkeepConfig, DEFAULT_CONFIG_PATH};
use certkeep_tls::tls::{lets_encrypt_directory, RenewalOutcome};
use certkeep_tls::{
    CertificateFileSink, CloudflareDnsProvider, CloudflareTxtResolver, FileRecordStore,
    LetsEncryptProvider, RenewalPolicy, RenewalScheduler, RenewalService, RenewalServiceBuilder,
};
use clap::Parser;
use logging::LogFormat;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(
        short = 'c',
        long = "config",
        alias = "cfg",
        env = "CERTKEEP_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CERTKEEP_LOG_LEVEL")]
    log_level: String,

    /// Log format: compact, full
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, env = "CERTKEEP_LOG_FORMAT")]
    log_format: LogFormat,

    /// Run the renewal check once and exit
    #[arg(long)]
    once: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = CertkeepConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let _log_guard = logging::init(&cli.log_level, cli.log_format, &config.log)?;
    info!("Loaded configuration from {}", cli.config.display());

    // instant-acme and cloudflare both reach rustls; pin the ring provider
    let _ = rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider());

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, cli.once))
}

fn build_service(config: &CertkeepConfig) -> anyhow::Result<RenewalService> {
    let dns = Arc::new(CloudflareDnsProvider::new(config.account.token.clone())?);

    let directory_url = match &config.acme.directory_url {
        Some(url) => url.clone(),
        None => lets_encrypt_directory(config.acme.environment == AcmeEnvironment::Staging)
            .to_string(),
    };
    let resolver = Arc::new(CloudflareTxtResolver::new());
    let mut provider = LetsEncryptProvider::new(directory_url, dns, resolver)
        .with_propagation_timeout(Duration::from_secs(config.acme.propagation_timeout_secs));
    if let Some(account_path) = &config.acme.account_path {
        provider = provider.with_account_path(account_path);
    }

    let service = RenewalServiceBuilder::new()
        .with_store(Arc::new(FileRecordStore::new(&config.path.json)))
        .with_authority(Arc::new(provider))
        .with_sink(CertificateFileSink::new(
            &config.path.cert,
            &config.path.key,
            &config.path.cacert,
        ))
        .with_policy(RenewalPolicy::from_days(config.renewal.lead_days))
        .with_domain(&config.domain.name)
        .with_email(&config.account.email)
        .build()?;
    Ok(service)
}

async fn run(config: CertkeepConfig, once: bool) -> anyhow::Result<()> {
    info!(
        "certkeep {} managing {} (ACME {})",
        env!("CARGO_PKG_VERSION"),
        config.domain.name,
        config.acme.environment
    );

    let service = Arc::new(build_service(&config)?);

    let startup = service.run_once().await;
    match &startup {
        Ok(RenewalOutcome::NotDue { renew_time }) => {
            info!("Certificate is current, next renewal after {}", renew_time)
        }
        Ok(RenewalOutcome::Issued { record, .. }) => {
            info!("Certificate issued, valid until {}", record.not_after)
        }
        Err(e) => error!("Startup renewal check failed: {}", e),
    }

    if once {
        startup.context("Renewal check failed")?;
        return Ok(());
    }

    let interval = check_interval(config.renewal.check_interval_hours);
    let scheduler = RenewalScheduler::new(service, interval);
    let cancellation_token = CancellationToken::new();

    let handle = tokio::spawn({
        let token = cancellation_token.clone();
        async move { scheduler.run(token).await }
    });

    shutdown_signal().await?;
    info!("Shutting down");
    cancellation_token.cancel();

    handle.await??;
    Ok(())
}

fn check_interval(hours: u64) -> Duration {
    Duration::from_secs(hours.saturating_mul(60 * 60))
}

async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}
