//! Store backend registration.
//!
//! Backends are declared once by name and then referenced by the challenge
//! store, the certificate store and the account store. The order of the
//! references is the read preference order.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{resolve_secret, ConfigError};

/// Storage section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StorageConfig {
    /// Declared backends
    #[serde(default)]
    pub backends: Vec<BackendConfig>,

    /// Backends holding challenge responses, in read preference order
    #[serde(default)]
    pub challenge_backends: Vec<String>,

    /// Backends holding issued certificates, in read preference order
    #[serde(default)]
    pub certificate_backends: Vec<String>,
}

impl StorageConfig {
    /// Look up a declared backend by name
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Kind of store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// One file per key under `path`
    Filesystem,
    /// HTTP blob container at `url`
    Blob,
    /// Process memory (lost on restart)
    Memory,
    /// Versioned certificate directory at `path`, freshest not-after wins
    CertificateDirectory,
}

/// One declared backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BackendConfig {
    pub name: String,
    pub kind: BackendKind,

    /// Directory for `filesystem` and `certificate-directory`
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Container URL for `blob`
    #[serde(default)]
    pub url: Option<String>,

    /// Shared access signature query string appended to blob URLs
    #[serde(default)]
    pub sas_token: Option<String>,

    /// Environment variable holding the shared access signature
    #[serde(default)]
    pub sas_token_env: Option<String>,

    /// Environment variable holding a bearer token for the blob container
    #[serde(default)]
    pub bearer_token_env: Option<String>,

    /// Prefix prepended to every blob name
    #[serde(default)]
    pub prefix: Option<String>,

    /// HTTP timeout for remote backends
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl BackendConfig {
    pub fn filesystem(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::empty(name, BackendKind::Filesystem)
        }
    }

    pub fn memory(name: impl Into<String>) -> Self {
        Self::empty(name, BackendKind::Memory)
    }

    fn empty(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            kind,
            path: None,
            url: None,
            sas_token: None,
            sas_token_env: None,
            bearer_token_env: None,
            prefix: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn resolve_sas_token(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret(self.sas_token.as_deref(), self.sas_token_env.as_deref())
    }

    pub fn resolve_bearer_token(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret(None, self.bearer_token_env.as_deref())
    }
}

fn default_timeout_secs() -> u64 {
    30
}
