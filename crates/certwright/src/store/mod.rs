//! Fan-out/fallback storage
//!
//! Challenge responses, the ACME account and issued certificates all go
//! through a [`FanoutStore`]: an ordered list of named backends.
//!
//! - `save` writes to every backend concurrently and succeeds as long as
//!   one backend accepted the write
//! - `load` asks the backends in registration order and returns the first
//!   hit; a failing backend is skipped
//! - `delete` is best effort everywhere
//!
//! Backends are declared once in the configuration and shared between the
//! stores that reference them through a [`BackendRegistry`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, trace, warn};

use certwright_config::{BackendKind, StorageConfig};

use crate::error::StorageError;

mod blob;
mod cert_dir;
mod certificate;
mod challenge;
mod fs;
mod memory;

pub use blob::BlobBackend;
pub use cert_dir::CertificateDirectoryBackend;
pub use certificate::{CertificateStore, ACCOUNT_KEY};
pub use challenge::ChallengeStore;
pub use fs::FileSystemBackend;
pub use memory::MemoryBackend;

/// A value to persist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub data: Vec<u8>,
    /// Expiry of the certificate held in `data`, when it is one
    pub not_after: Option<DateTime<Utc>>,
}

impl StoreEntry {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            not_after: None,
        }
    }

    pub fn with_not_after(mut self, not_after: DateTime<Utc>) -> Self {
        self.not_after = Some(not_after);
        self
    }
}

/// One place where keyed blobs can be persisted.
///
/// Implementations must accept concurrent independent writes and write each
/// blob as a whole.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Name the backend was registered under
    fn name(&self) -> &str;

    async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError>;

    /// `Ok(None)` when the key does not exist
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Ordered set of backends with fan-out writes and fallback reads
#[derive(Clone, Default)]
pub struct FanoutStore {
    backends: Vec<Arc<dyn StoreBackend>>,
}

impl FanoutStore {
    pub fn new(backends: Vec<Arc<dyn StoreBackend>>) -> Self {
        Self { backends }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Write `entry` to every backend.
    ///
    /// Individual failures are logged; the call fails only when no backend
    /// accepted the write.
    pub async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError> {
        validate_key(key)?;

        let results = join_all(self.backends.iter().map(|backend| async move {
            let result = backend.save(key, entry).await;
            (backend.name(), result)
        }))
        .await;

        let mut failures = 0;
        for (backend, result) in results {
            match result {
                Ok(()) => trace!(backend = %backend, key = %key, "Saved entry"),
                Err(e) => {
                    failures += 1;
                    warn!(backend = %backend, key = %key, error = %e, "Backend failed to save entry");
                }
            }
        }

        if failures == self.backends.len() {
            return Err(StorageError::AllBackendsFailed {
                key: key.to_string(),
                count: self.backends.len(),
            });
        }

        debug!(
            key = %key,
            saved = self.backends.len() - failures,
            failed = failures,
            "Saved entry to store"
        );
        Ok(())
    }

    /// First non-empty value in registration order
    pub async fn load(&self, key: &str) -> Option<Vec<u8>> {
        if let Err(e) = validate_key(key) {
            warn!(key = %key, error = %e, "Refusing to load entry");
            return None;
        }

        for backend in &self.backends {
            match backend.load(key).await {
                Ok(Some(data)) if !data.is_empty() => {
                    trace!(backend = %backend.name(), key = %key, "Loaded entry");
                    return Some(data);
                }
                Ok(_) => trace!(backend = %backend.name(), key = %key, "Entry not found"),
                Err(e) => {
                    warn!(backend = %backend.name(), key = %key, error = %e, "Backend failed to load entry");
                }
            }
        }

        debug!(key = %key, "Entry not found in any backend");
        None
    }

    /// Remove `key` everywhere, ignoring failures
    pub async fn delete(&self, key: &str) {
        if validate_key(key).is_err() {
            return;
        }

        let results = join_all(self.backends.iter().map(|backend| async move {
            (backend.name(), backend.delete(key).await)
        }))
        .await;

        for (backend, result) in results {
            if let Err(e) = result {
                warn!(backend = %backend, key = %key, error = %e, "Backend failed to delete entry");
            }
        }
    }
}

/// Keys become file and blob names
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.len() <= 255
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Backends built from the `[[storage.backends]]` declarations
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn StoreBackend>>,
}

impl BackendRegistry {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let mut backends: HashMap<String, Arc<dyn StoreBackend>> = HashMap::new();

        for declared in &config.backends {
            let backend: Arc<dyn StoreBackend> = match declared.kind {
                BackendKind::Filesystem => Arc::new(FileSystemBackend::new(
                    &declared.name,
                    required_path(declared)?,
                )?),
                BackendKind::CertificateDirectory => Arc::new(CertificateDirectoryBackend::new(
                    &declared.name,
                    required_path(declared)?,
                )?),
                BackendKind::Memory => Arc::new(MemoryBackend::new(&declared.name)),
                BackendKind::Blob => Arc::new(BlobBackend::from_config(declared)?),
            };
            debug!(backend = %declared.name, kind = ?declared.kind, "Registered store backend");
            backends.insert(declared.name.clone(), backend);
        }

        Ok(Self { backends })
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StoreBackend>> {
        self.backends.get(name).cloned()
    }

    /// Fan-out store over the named backends, in the given order
    pub fn fanout(&self, names: &[String]) -> Result<FanoutStore, StorageError> {
        names
            .iter()
            .map(|name| {
                self.get(name).ok_or_else(|| {
                    StorageError::Configuration(format!("unknown backend '{}'", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(FanoutStore::new)
    }
}

fn required_path(
    declared: &certwright_config::BackendConfig,
) -> Result<&std::path::Path, StorageError> {
    declared.path.as_deref().ok_or_else(|| {
        StorageError::Configuration(format!("backend '{}' requires a path", declared.name))
    })
}
