//! Versioned certificate directory
//!
//! Keeps every certificate ever saved for a key, like a machine
//! certificate store does:
//!
//! ```text
//! /etc/certwright/certs/
//! └── example.pfx/
//!     ├── 1767225600-0.pfx   # older renewal, kept
//!     └── 1772323200-1.pfx   # freshest not-after, returned by load
//! ```
//!
//! File names are `<not_after_unix>-<seq>.pfx`; `seq` only breaks ties
//! between certificates expiring at the same second.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, trace};

use super::fs::write_atomic;
use super::{StoreBackend, StoreEntry};
use crate::error::StorageError;

const EXTENSION: &str = "pfx";

#[derive(Debug)]
pub struct CertificateDirectoryBackend {
    name: String,
    root: PathBuf,
}

/// One stored version, parsed from its file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub not_after: i64,
    pub seq: u64,
}

impl Version {
    fn parse(file_name: &str) -> Option<Self> {
        let stem = file_name.strip_suffix(".pfx")?;
        let (not_after, seq) = stem.split_once('-')?;
        Some(Self {
            not_after: not_after.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }

    fn file_name(&self) -> String {
        format!("{}-{}.{}", self.not_after, self.seq, EXTENSION)
    }
}

impl CertificateDirectoryBackend {
    pub fn new(name: impl Into<String>, root: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(root, fs::Permissions::from_mode(0o700))?;
        }

        let name = name.into();
        info!(
            backend = %name,
            storage_path = %root.display(),
            "Initialized certificate directory backend"
        );

        Ok(Self {
            name,
            root: root.to_path_buf(),
        })
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Stored versions for `key`, oldest first
    pub async fn versions(&self, key: &str) -> Result<Vec<Version>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.key_dir(key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            match Version::parse(&file_name.to_string_lossy()) {
                Some(version) => versions.push(version),
                None => trace!(file = ?file_name, "Ignoring foreign file in certificate directory"),
            }
        }
        versions.sort();
        Ok(versions)
    }
}

#[async_trait]
impl StoreBackend for CertificateDirectoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError> {
        let not_after = entry
            .not_after
            .ok_or_else(|| StorageError::MissingNotAfter {
                backend: self.name.clone(),
                key: key.to_string(),
            })?
            .timestamp();

        let dir = self.key_dir(key);
        tokio::fs::create_dir_all(&dir).await?;

        let seq = self
            .versions(key)
            .await?
            .iter()
            .map(|v| v.seq + 1)
            .max()
            .unwrap_or(0);
        let version = Version { not_after, seq };

        write_atomic(&dir.join(version.file_name()), &entry.data).await?;
        debug!(
            backend = %self.name,
            key = %key,
            not_after,
            seq,
            "Added certificate version"
        );
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(freshest) = self.versions(key).await?.pop() else {
            return Ok(None);
        };

        let path = self.key_dir(key).join(freshest.file_name());
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_dir_all(self.key_dir(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
