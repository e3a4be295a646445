use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Certificate authority error: {0}")]
    Authority(#[from] AuthorityError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures reading or writing the certificate metadata record
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed certificate record: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Write(#[from] FilesystemError),
}

/// Every way the certificate authority client can fail. The renewal
/// service treats them all alike: the attempt is abandoned and retried on
/// the next scheduled check.
#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Account rejected: {0}")]
    Auth(String),

    #[error("Challenge failed: {0}")]
    Challenge(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("ACME error: {0}")]
    Acme(String),

    #[error("DNS provider error: {0}")]
    Dns(String),

    #[error("Certificate generation error: {0}")]
    CertificateGeneration(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<instant_acme::Error> for AuthorityError {
    fn from(err: instant_acme::Error) -> Self {
        match err {
            instant_acme::Error::Api(problem) => {
                let detail = problem
                    .detail
                    .clone()
                    .unwrap_or_else(|| problem.to_string());
                let kind = problem
                    .r#type
                    .as_deref()
                    .and_then(|t| t.rsplit(':').next())
                    .unwrap_or_default();

                match kind {
                    "rateLimited" => AuthorityError::RateLimited(detail),
                    "unauthorized" | "accountDoesNotExist" | "badNonce"
                    | "userActionRequired" | "rejectedIdentifier" | "invalidContact" => {
                        AuthorityError::Auth(detail)
                    }
                    "dns" | "connection" | "incorrectResponse" | "caa" => {
                        AuthorityError::Challenge(detail)
                    }
                    _ => AuthorityError::Acme(detail),
                }
            }
            other => {
                let message = other.to_string();
                // instant-acme prefixes transport failures this way
                if message.starts_with("HTTP request failure") {
                    AuthorityError::Network(message)
                } else {
                    AuthorityError::Acme(message)
                }
            }
        }
    }
}

impl From<rcgen::Error> for AuthorityError {
    fn from(err: rcgen::Error) -> Self {
        AuthorityError::CertificateGeneration(err.to_string())
    }
}

impl From<anyhow::Error> for AuthorityError {
    fn from(err: anyhow::Error) -> Self {
        AuthorityError::Dns(err.to_string())
    }
}

/// Failures writing certificate artifacts to their configured locations
#[derive(Error, Debug)]
pub enum FilesystemError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to restrict permissions on {path}: {source}")]
    Permissions {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move {path} into place: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum BuilderError {
    #[error("Missing record store")]
    MissingStore,

    #[error("Missing certificate authority")]
    MissingAuthority,

    #[error("Missing certificate sink")]
    MissingSink,

    #[error("Missing domain")]
    MissingDomain,

    #[error("Missing account email")]
    MissingEmail,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(problem_type: &str, status: u16) -> instant_acme::Error {
        let problem: instant_acme::Problem = serde_json::from_value(serde_json::json!({
            "type": problem_type,
            "detail": format!("{} detail", problem_type),
            "status": status,
        }))
        .unwrap();
        instant_acme::Error::Api(problem)
    }

    #[test]
    fn test_acme_problem_types_map_to_error_kinds() {
        let cases = [
            ("urn:ietf:params:acme:error:rateLimited", 429, "RateLimited"),
            ("urn:ietf:params:acme:error:unauthorized", 403, "Auth"),
            ("urn:ietf:params:acme:error:accountDoesNotExist", 400, "Auth"),
            ("urn:ietf:params:acme:error:badNonce", 400, "Auth"),
            ("urn:ietf:params:acme:error:rejectedIdentifier", 400, "Auth"),
            ("urn:ietf:params:acme:error:invalidContact", 400, "Auth"),
            ("urn:ietf:params:acme:error:dns", 400, "Challenge"),
            ("urn:ietf:params:acme:error:connection", 400, "Challenge"),
            ("urn:ietf:params:acme:error:incorrectResponse", 403, "Challenge"),
            ("urn:ietf:params:acme:error:caa", 403, "Challenge"),
            ("urn:ietf:params:acme:error:serverInternal", 500, "Acme"),
            ("about:blank", 400, "Acme"),
        ];

        for (problem_type, status, expected) in cases {
            let err = AuthorityError::from(api_error(problem_type, status));
            let kind = match &err {
                AuthorityError::RateLimited(_) => "RateLimited",
                AuthorityError::Auth(_) => "Auth",
                AuthorityError::Challenge(_) => "Challenge",
                AuthorityError::Acme(_) => "Acme",
                other => panic!("unexpected mapping for {}: {:?}", problem_type, other),
            };
            assert_eq!(kind, expected, "{}", problem_type);
            assert!(err.to_string().contains("detail"), "{}", err);
        }
    }

    #[test]
    fn test_problem_without_type_is_generic_acme_error() {
        let problem: instant_acme::Problem =
            serde_json::from_value(serde_json::json!({ "status": 500 })).unwrap();
        assert!(matches!(
            AuthorityError::from(instant_acme::Error::Api(problem)),
            AuthorityError::Acme(_)
        ));
    }

    #[test]
    fn test_non_api_errors() {
        assert!(matches!(
            AuthorityError::from(instant_acme::Error::Str("missing Location header")),
            AuthorityError::Acme(_)
        ));
        assert!(matches!(
            AuthorityError::from(anyhow::anyhow!("Zone not found for example.com")),
            AuthorityError::Dns(_)
        ));
    }

    #[test]
    fn test_errors_nest_into_tls_error() {
        let err: TlsError = StorageError::Write(FilesystemError::Commit {
            path: PathBuf::from("/data/cert.json"),
            source: std::io::Error::other("disk full"),
        })
        .into();
        assert!(err.to_string().contains("/data/cert.json"));

        let err: TlsError = AuthorityError::RateLimited("too many orders".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Certificate authority error: Rate limited: too many orders"
        );
    }
}
