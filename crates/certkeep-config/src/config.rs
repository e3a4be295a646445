use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where the binary looks for its config file when no flag is given
pub const DEFAULT_CONFIG_PATH: &str = "/data/cert/config/config.toml";

const DEFAULT_MAX_LOG_SIZE_MB: u64 = 5;
const DEFAULT_PROPAGATION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_LEAD_DAYS: i64 = 30;
const DEFAULT_CHECK_INTERVAL_HOURS: u64 = 24;
const MAX_LEAD_DAYS: i64 = 365;
const MAX_CHECK_INTERVAL_HOURS: u64 = 24 * 365;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {details}")]
    InvalidConfiguration { details: String },
}

/// Top-level config file layout.
///
/// Section and key names also accept the capitalised spelling used by older
/// deployments (`[Path] CaCert = ...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertkeepConfig {
    #[serde(default, alias = "Log")]
    pub log: LogConfig,
    #[serde(alias = "Account")]
    pub account: AccountConfig,
    #[serde(alias = "Path")]
    pub path: PathConfig,
    #[serde(alias = "Domain")]
    pub domain: DomainConfig,
    #[serde(default, alias = "Acme")]
    pub acme: AcmeConfig,
    #[serde(default, alias = "Renewal")]
    pub renewal: RenewalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Optional log file; stdout logging is always enabled
    #[serde(default, alias = "LogFilePath")]
    pub logfilepath: Option<PathBuf>,
    /// Rotation threshold in MiB, 0 disables rotation
    #[serde(default = "default_max_log_size", alias = "MaxLogSize")]
    pub maxlogsize: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            logfilepath: None,
            maxlogsize: DEFAULT_MAX_LOG_SIZE_MB,
        }
    }
}

impl LogConfig {
    pub fn max_log_bytes(&self) -> u64 {
        self.maxlogsize.saturating_mul(1024 * 1024)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(alias = "Email")]
    pub email: String,
    /// DNS provider API token used to publish DNS-01 challenge records
    #[serde(alias = "Token")]
    pub token: String,
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("email", &self.email)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    #[serde(alias = "Cert")]
    pub cert: PathBuf,
    #[serde(alias = "Key")]
    pub key: PathBuf,
    #[serde(alias = "CaCert")]
    pub cacert: PathBuf,
    /// Certificate metadata record
    #[serde(alias = "Json")]
    pub json: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(alias = "Name")]
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcmeEnvironment {
    #[default]
    Production,
    Staging,
}

impl fmt::Display for AcmeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcmeEnvironment::Production => write!(f, "production"),
            AcmeEnvironment::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    #[serde(default)]
    pub environment: AcmeEnvironment,
    /// Overrides the Let's Encrypt directory (e.g. a local Pebble instance)
    #[serde(default)]
    pub directory_url: Option<String>,
    /// Where ACME account credentials are kept between runs. When unset a
    /// fresh account is registered on every issuance.
    #[serde(default)]
    pub account_path: Option<PathBuf>,
    /// Upper bound on waiting for challenge records to reach public resolvers
    #[serde(default = "default_propagation_timeout", alias = "propagation_delay_secs")]
    pub propagation_timeout_secs: u64,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            environment: AcmeEnvironment::default(),
            directory_url: None,
            account_path: None,
            propagation_timeout_secs: DEFAULT_PROPAGATION_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewalConfig {
    /// How long before expiry a certificate becomes due for renewal
    #[serde(default = "default_lead_days")]
    pub lead_days: i64,
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            lead_days: DEFAULT_LEAD_DAYS,
            check_interval_hours: DEFAULT_CHECK_INTERVAL_HOURS,
        }
    }
}

fn default_max_log_size() -> u64 {
    DEFAULT_MAX_LOG_SIZE_MB
}

fn default_propagation_timeout() -> u64 {
    DEFAULT_PROPAGATION_TIMEOUT_SECS
}

fn default_lead_days() -> i64 {
    DEFAULT_LEAD_DAYS
}

fn default_check_interval_hours() -> u64 {
    DEFAULT_CHECK_INTERVAL_HOURS
}

impl CertkeepConfig {
    /// Read, parse and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: CertkeepConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.domain.name.trim().is_empty() {
            problems.push("domain.name must not be empty".to_string());
        }
        if self.domain.name.starts_with("*.") {
            problems.push(format!(
                "domain.name '{}' is a wildcard, which is not supported",
                self.domain.name
            ));
        }
        if self.account.email.trim().is_empty() {
            problems.push("account.email must not be empty".to_string());
        }
        if self.account.token.trim().is_empty() {
            problems.push("account.token must not be empty".to_string());
        }

        for (name, path) in [
            ("path.cert", &self.path.cert),
            ("path.key", &self.path.key),
            ("path.cacert", &self.path.cacert),
            ("path.json", &self.path.json),
        ] {
            if path.as_os_str().is_empty() {
                problems.push(format!("{} must not be empty", name));
            }
        }

        if !(1..=MAX_LEAD_DAYS).contains(&self.renewal.lead_days) {
            problems.push(format!(
                "renewal.lead_days must be between 1 and {}, got {}",
                MAX_LEAD_DAYS, self.renewal.lead_days
            ));
        }
        if !(1..=MAX_CHECK_INTERVAL_HOURS).contains(&self.renewal.check_interval_hours) {
            problems.push(format!(
                "renewal.check_interval_hours must be between 1 and {}, got {}",
                MAX_CHECK_INTERVAL_HOURS, self.renewal.check_interval_hours
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::InvalidConfiguration {
                details: problems.join("; "),
            })
        }
    }
}
