use certkeep_config::{CertkeepConfig, ConfigError};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
[account]
email = "ops@example.org"
token = "token"

[path]
cert = "/srv/tls/cert.pem"
key = "/srv/tls/key.pem"
cacert = "/srv/tls/ca.pem"
json = "/srv/tls/cert.json"

[domain]
name = "example.org"
"#,
    )
    .unwrap();

    let config = CertkeepConfig::load(&config_path).unwrap();
    assert_eq!(config.domain.name, "example.org");
    assert_eq!(config.account.email, "ops@example.org");
}

#[test]
fn test_load_missing_file_reports_path() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("absent.toml");

    match CertkeepConfig::load(&config_path) {
        Err(ConfigError::Io { path, .. }) => assert_eq!(path, config_path),
        other => panic!("Expected Io error, got {:?}", other),
    }
}
