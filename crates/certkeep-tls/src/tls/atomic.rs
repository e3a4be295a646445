//! Owner-only file writes that never expose a partially written file

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::errors::FilesystemError;

/// A file written next to its target and waiting to be renamed into place
pub struct StagedFile {
    temp: NamedTempFile,
    target: PathBuf,
}

impl StagedFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically replace the target with the staged content
    pub fn commit(self) -> Result<(), FilesystemError> {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| FilesystemError::Commit {
                path: target.clone(),
                source: e.error,
            })?;
        Ok(())
    }
}

/// Write `contents` to a temporary sibling of `target` with mode 0600 and
/// flush it to disk. Nothing at `target` changes until `commit`.
pub fn stage_private_file(target: &Path, contents: &[u8]) -> Result<StagedFile, FilesystemError> {
    let write_err = |source: std::io::Error| FilesystemError::Write {
        path: target.to_path_buf(),
        source,
    };

    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let temp = tempfile::Builder::new()
        .prefix(".certkeep-")
        .tempfile_in(dir)
        .map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600)).map_err(|source| {
            FilesystemError::Permissions {
                path: target.to_path_buf(),
                source,
            }
        })?;
    }

    let mut file = temp.as_file();
    file.write_all(contents).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;

    Ok(StagedFile {
        temp,
        target: target.to_path_buf(),
    })
}

pub fn write_private_file(target: &Path, contents: &[u8]) -> Result<(), FilesystemError> {
    stage_private_file(target, contents)?.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staged_file_is_invisible_until_commit() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("cert.pem");
        fs::write(&target, "old").unwrap();

        let staged = stage_private_file(&target, b"new").unwrap();
        assert_eq!(staged.target(), target.as_path());
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");

        staged.commit().unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn test_dropped_stage_leaves_no_trace() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("key.pem");

        drop(stage_private_file(&target, b"secret").unwrap());

        assert!(!target.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_creates_missing_directories() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("nested/dir/ca.pem");

        write_private_file(&target, b"ca").unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "ca");
    }

    #[cfg(unix)]
    #[test]
    fn test_written_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("key.pem");
        write_private_file(&target, b"secret").unwrap();

        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
