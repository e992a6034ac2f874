//! Filesystem backend
//!
//! One file per key directly under the base directory:
//!
//! ```text
//! /var/lib/certwright/
//! ├── acme-account      # ACME account credentials (JSON)
//! ├── example.pfx       # Issued certificate bundle
//! └── Xk2...q8          # Pending HTTP-01 key authorization
//! ```
//!
//! Writes go to a temporary sibling which is then renamed over the target,
//! so readers see either the old or the new blob.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{info, trace};
use uuid::Uuid;

use super::{StoreBackend, StoreEntry};
use crate::error::StorageError;

#[derive(Debug)]
pub struct FileSystemBackend {
    name: String,
    base_path: PathBuf,
}

impl FileSystemBackend {
    /// Create the backend, creating `base_path` with 0700 permissions on Unix
    pub fn new(name: impl Into<String>, base_path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        let name = name.into();
        info!(
            backend = %name,
            storage_path = %base_path.display(),
            "Initialized filesystem store backend"
        );

        Ok(Self {
            name,
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }
}

/// Write `data` to `target` through a temporary file and a rename
pub(crate) async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StorageError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    tokio::fs::write(&tmp, data).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600)).await?;
    }

    if let Err(e) = tokio::fs::rename(&tmp, target).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

#[async_trait]
impl StoreBackend for FileSystemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError> {
        let path = self.path_for(key);
        write_atomic(&path, &entry.data).await?;
        trace!(path = %path.display(), bytes = entry.data.len(), "Wrote store file");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_roundtrip_and_delete() {
        let dir = TempDir::new().unwrap();
        let backend = FileSystemBackend::new("local", dir.path()).unwrap();

        assert_eq!(backend.load("acme-account").await.unwrap(), None);

        backend
            .save("acme-account", &StoreEntry::new(r#"{"id":"x"}"#))
            .await
            .unwrap();
        assert_eq!(
            backend.load("acme-account").await.unwrap(),
            Some(br#"{"id":"x"}"#.to_vec())
        );

        backend.delete("acme-account").await.unwrap();
        backend.delete("acme-account").await.unwrap();
        assert_eq!(backend.load("acme-account").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let backend = FileSystemBackend::new("local", dir.path()).unwrap();

        backend.save("site.pfx", &StoreEntry::new("one")).await.unwrap();
        backend.save("site.pfx", &StoreEntry::new("two")).await.unwrap();

        assert_eq!(backend.load("site.pfx").await.unwrap(), Some(b"two".to_vec()));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["site.pfx".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let base = dir.path().join("store");
        let backend = FileSystemBackend::new("local", &base).unwrap();
        backend.save("secret", &StoreEntry::new("s")).await.unwrap();

        let dir_mode = std::fs::metadata(&base).unwrap().permissions().mode() & 0o777;
        let file_mode = std::fs::metadata(base.join("secret"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }
}
