//! Certwright configuration
//!
//! The configuration is a single TOML document:
//!
//! ```toml
//! [account]
//! email = "admin@example.com"
//! backend = "local"
//!
//! [storage]
//! challenge-backends = ["local"]
//! certificate-backends = ["local"]
//!
//! [[storage.backends]]
//! name = "local"
//! kind = "filesystem"
//! path = "/var/lib/certwright"
//!
//! [[sites]]
//! name = "example"
//! domains = ["example.com", "www.example.com"]
//! password-env = "CERTWRIGHT_PFX_PASSWORD"
//! ```
//!
//! Loading only checks syntax and types; call [`Config::validate`] to get
//! every semantic problem reported at once.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

pub mod dns;
pub mod site;
pub mod storage;
pub mod validate;

pub use dns::{DnsConfig, MatchMode};
pub use site::{
    ChallengePreference, CsrConfig, FailMode, KeyAlgorithm, RenewalConfig, SiteConfig,
};
pub use storage::{BackendConfig, BackendKind, StorageConfig};
pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Let's Encrypt production directory URL
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable '{0}' is not set")]
    MissingEnv(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub account: AccountConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Zone API and propagation settings for DNS-01
    #[serde(default)]
    pub dns: Option<DnsConfig>,

    #[serde(default)]
    pub sites: Vec<SiteConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        trace!(
            sites = config.sites.len(),
            backends = config.storage.backends.len(),
            dns = config.dns.is_some(),
            "Parsed configuration"
        );
        Ok(config)
    }

    /// Run every semantic check
    pub fn validate(&self) -> ValidationResult {
        let mut result = validate::sites::validate_sites(self);
        result.merge(validate::storage::validate_storage(self));
        result.merge(validate::lint::lint_config(self));
        result
    }

    /// Look up a site by name
    pub fn site(&self, name: &str) -> Option<&SiteConfig> {
        self.sites.iter().find(|s| s.name == name)
    }
}

/// ACME account options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AccountConfig {
    /// Contact email registered with the CA
    pub email: String,

    /// ACME directory URL; overrides `staging`
    #[serde(default)]
    pub directory: Option<String>,

    /// Use the Let's Encrypt staging directory
    #[serde(default)]
    pub staging: bool,

    /// Name of the backend that owns the account credentials
    pub backend: String,
}

impl AccountConfig {
    /// ACME directory URL to use
    pub fn directory_url(&self) -> &str {
        match &self.directory {
            Some(url) => url,
            None if self.staging => LETSENCRYPT_STAGING,
            None => LETSENCRYPT_PRODUCTION,
        }
    }
}

/// Resolve a secret given inline or through an environment variable.
///
/// The inline value wins when both are set.
pub(crate) fn resolve_secret(
    inline: Option<&str>,
    env: Option<&str>,
) -> Result<Option<String>, ConfigError> {
    if let Some(value) = inline {
        return Ok(Some(value.to_string()));
    }
    match env {
        Some(var) => std::env::var(var)
            .map(Some)
            .map_err(|_| ConfigError::MissingEnv(var.to_string())),
        None => Ok(None),
    }
}
