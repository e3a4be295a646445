mod atomic;
pub mod errors;
pub mod models;
pub mod policy;
pub mod providers;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod sink;

#[cfg(test)]
pub mod test_utils;

pub use errors::{AuthorityError, BuilderError, FilesystemError, StorageError, TlsError};
pub use models::{CertificateBundle, CertificateRecord, RenewalOutcome, UtcDateTime};
pub use policy::{RenewalPolicy, DEFAULT_RENEWAL_LEAD_DAYS};
pub use providers::{
    lets_encrypt_directory, CertificateAuthority, LetsEncryptProvider, DEFAULT_PROPAGATION_TIMEOUT,
};
pub use repository::{CertificateRecordStore, FileRecordStore};
pub use scheduler::{RenewalScheduler, DEFAULT_CHECK_INTERVAL};
pub use service::{RenewalService, RenewalServiceBuilder};
pub use sink::{CertificateFileSink, StagedArtifacts};
