//! Configuration loading for certkeep

mod config;

pub use config::{
    AccountConfig, AcmeConfig, AcmeEnvironment, CertkeepConfig, ConfigError, DomainConfig,
    LogConfig, PathConfig, RenewalConfig, DEFAULT_CONFIG_PATH,
};
