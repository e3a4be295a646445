use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::atomic::{stage_private_file, StagedFile};
use super::errors::FilesystemError;
use super::models::CertificateBundle;

/// Writes issued certificate artifacts to their configured locations.
///
/// Writing happens in two steps so the caller can decide when the new
/// files become visible: `stage` writes every artifact to a temporary
/// sibling, and `StagedArtifacts::commit` renames them into place.
#[derive(Debug, Clone)]
pub struct CertificateFileSink {
    cert_path: PathBuf,
    key_path: PathBuf,
    ca_cert_path: PathBuf,
}

impl CertificateFileSink {
    pub fn new(
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
        ca_cert_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            ca_cert_path: ca_cert_path.into(),
        }
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn ca_cert_path(&self) -> &Path {
        &self.ca_cert_path
    }

    /// Write all three artifacts to temporary files with mode 0600. If any
    /// of them fails, the already staged ones are discarded and the
    /// current files are left untouched.
    pub async fn stage(&self, bundle: &CertificateBundle) -> Result<StagedArtifacts, FilesystemError> {
        let sink = self.clone();
        let bundle = bundle.clone();

        let staged = tokio::task::spawn_blocking(move || {
            let cert = stage_private_file(&sink.cert_path, bundle.certificate_pem.as_bytes())?;
            let key = stage_private_file(&sink.key_path, bundle.private_key_pem.as_bytes())?;
            let ca_cert = stage_private_file(&sink.ca_cert_path, bundle.issuer_pem.as_bytes())?;
            Ok::<_, FilesystemError>(vec![cert, key, ca_cert])
        })
        .await
        .map_err(|e| FilesystemError::Write {
            path: self.cert_path.clone(),
            source: std::io::Error::other(e),
        })??;

        debug!("Staged certificate artifacts for {}", self.cert_path.display());
        Ok(StagedArtifacts { files: staged })
    }
}

/// Artifacts written to disk but not yet visible at their final paths
pub struct StagedArtifacts {
    files: Vec<StagedFile>,
}

impl StagedArtifacts {
    pub async fn commit(self) -> Result<(), FilesystemError> {
        let files = self.files;
        let targets: Vec<PathBuf> = files.iter().map(|f| f.target().to_path_buf()).collect();
        let first = targets.first().cloned().unwrap_or_default();

        tokio::task::spawn_blocking(move || {
            for file in files {
                file.commit()?;
            }
            Ok::<_, FilesystemError>(())
        })
        .await
        .map_err(|e| FilesystemError::Commit {
            path: first,
            source: std::io::Error::other(e),
        })??;

        for target in &targets {
            info!("Wrote {}", target.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bundle() -> CertificateBundle {
        CertificateBundle {
            certificate_pem: "leaf+chain".to_string(),
            private_key_pem: "private key".to_string(),
            issuer_pem: "chain".to_string(),
        }
    }

    fn sink_in(dir: &Path) -> CertificateFileSink {
        CertificateFileSink::new(
            dir.join("certs/cert.pem"),
            dir.join("certs/key.pem"),
            dir.join("certs/ca.pem"),
        )
    }

    #[tokio::test]
    async fn test_stage_then_commit_writes_all_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let sink = sink_in(temp_dir.path());

        let staged = sink.stage(&bundle()).await.unwrap();
        assert!(!sink.cert_path().exists());

        staged.commit().await.unwrap();
        assert_eq!(std::fs::read_to_string(sink.cert_path()).unwrap(), "leaf+chain");
        assert_eq!(std::fs::read_to_string(sink.key_path()).unwrap(), "private key");
        assert_eq!(std::fs::read_to_string(sink.ca_cert_path()).unwrap(), "chain");
    }

    #[tokio::test]
    async fn test_uncommitted_stage_keeps_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let sink = sink_in(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join("certs")).unwrap();
        std::fs::write(sink.key_path(), "old key").unwrap();

        drop(sink.stage(&bundle()).await.unwrap());

        assert_eq!(std::fs::read_to_string(sink.key_path()).unwrap(), "old key");
        assert_eq!(
            std::fs::read_dir(temp_dir.path().join("certs")).unwrap().count(),
            1
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_artifacts_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let sink = sink_in(temp_dir.path());
        sink.stage(&bundle()).await.unwrap().commit().await.unwrap();

        for path in [sink.cert_path(), sink.key_path(), sink.ca_cert_path()] {
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600, "{}", path.display());
        }
    }

    #[tokio::test]
    async fn test_unwritable_target_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        // a regular file where a directory is expected
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let sink = CertificateFileSink::new(
            blocker.join("cert.pem"),
            temp_dir.path().join("key.pem"),
            temp_dir.path().join("ca.pem"),
        );

        let result = sink.stage(&bundle()).await;
        assert!(matches!(result, Err(FilesystemError::Write { .. })));
    }
}
