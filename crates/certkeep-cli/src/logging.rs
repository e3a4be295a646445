use anyhow::Context;
use certkeep_config::LogConfig;
use clap::ValueEnum;
use file_rotate::{compression::Compression, suffix::AppendCount, ContentLimit, FileRotate};
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Full,
}

fn default_filter(level: &str) -> String {
    format!(
        "certkeep={level},\
         certkeep_cli={level},\
         certkeep_config={level},\
         certkeep_tls={level},\
         instant_acme=warn,\
         cloudflare=warn,\
         hyper=warn,\
         hyper_util=warn,\
         reqwest=warn,\
         rustls=warn",
        level = level
    )
}

/// Install the global subscriber: stdout always, plus the configured log
/// file. The returned guard flushes the file writer when dropped.
pub fn init(
    level: &str,
    format: LogFormat,
    config: &LogConfig,
) -> anyhow::Result<Option<WorkerGuard>> {
    // RUST_LOG, when set, takes full control
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .context("Invalid RUST_LOG environment variable")?
    } else {
        tracing_subscriber::EnvFilter::try_new(default_filter(level))
            .with_context(|| format!("Invalid log level '{}'", level))?
    };

    let mut layers = Vec::new();
    layers.push(match format {
        LogFormat::Full => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    });

    let mut guard = None;
    if let Some(path) = &config.logfilepath {
        let (writer, file_guard) = file_writer(path, config.max_log_bytes())
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        layers.push(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(filter)
        .with(layers)
        .try_init()
        .context("Failed to set global default subscriber")?;
    Ok(guard)
}

/// Background writer for the log file. Past `max_bytes` the file moves to
/// `<path>.1`, replacing the previous backup; zero never rotates.
fn file_writer(path: &Path, max_bytes: u64) -> anyhow::Result<(NonBlocking, WorkerGuard)> {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)?;

    if max_bytes == 0 {
        let file_name = path
            .file_name()
            .context("Log file path has no file name")?;
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(file_name.to_string_lossy())
            .build(directory)?;
        return Ok(tracing_appender::non_blocking(appender));
    }

    let limit = usize::try_from(max_bytes).unwrap_or(usize::MAX);
    let rotating = FileRotate::new(
        path,
        AppendCount::new(1),
        ContentLimit::BytesSurpassed(limit),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    Ok(tracing_appender::non_blocking(rotating))
}
