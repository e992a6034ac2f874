//! Per-site certificate options.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{resolve_secret, ConfigError};

/// One certificate to keep issued and renewed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SiteConfig {
    /// Site name; also the certificate friendly name and store key stem
    pub name: String,

    /// Domains on the certificate, in order. The first one is the default
    /// common name.
    pub domains: Vec<String>,

    /// Certificate friendly name embedded in the PFX (defaults to `name`)
    #[serde(default)]
    pub friendly_name: Option<String>,

    /// PFX password given inline
    #[serde(default)]
    pub password: Option<String>,

    /// Environment variable holding the PFX password
    #[serde(default)]
    pub password_env: Option<String>,

    /// Challenge type to pursue for each authorization
    #[serde(default)]
    pub challenge: ChallengePreference,

    /// Private key algorithm for issued certificates
    #[serde(default)]
    pub key_algorithm: KeyAlgorithm,

    /// CSR subject metadata
    #[serde(default)]
    pub csr: CsrConfig,

    /// Renewal timing and failure policy
    #[serde(default)]
    pub renewal: RenewalConfig,
}

impl SiteConfig {
    pub fn new(name: impl Into<String>, domains: Vec<String>) -> Self {
        Self {
            name: name.into(),
            domains,
            friendly_name: None,
            password: None,
            password_env: None,
            challenge: ChallengePreference::default(),
            key_algorithm: KeyAlgorithm::default(),
            csr: CsrConfig::default(),
            renewal: RenewalConfig::default(),
        }
    }

    /// Friendly name used inside the PFX bundle
    pub fn friendly_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }

    /// Resolve the PFX password from the inline value or its variable.
    ///
    /// A site without any password configured uses the empty password.
    pub fn resolve_password(&self) -> Result<String, ConfigError> {
        Ok(
            resolve_secret(self.password.as_deref(), self.password_env.as_deref())?
                .unwrap_or_default(),
        )
    }
}

/// Which challenge kind to pursue for an authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengePreference {
    /// HTTP-01 only
    #[default]
    #[serde(rename = "http-01")]
    Http01,
    /// DNS-01 only
    #[serde(rename = "dns-01")]
    Dns01,
    /// DNS-01 for wildcard names, HTTP-01 otherwise
    Auto,
}

impl ChallengePreference {
    /// Whether orders for this site may need a DNS publisher
    pub fn may_use_dns(&self, domains: &[String]) -> bool {
        match self {
            Self::Http01 => false,
            Self::Dns01 => true,
            Self::Auto => domains.iter().any(|d| d.starts_with("*.")),
        }
    }
}

/// Key algorithm of the certificate private key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSA 2048 with SHA-256
    RS256,
    /// ECDSA P-256 with SHA-256
    #[default]
    ES256,
    /// ECDSA P-384 with SHA-384
    ES384,
    /// ECDSA P-521 with SHA-512
    ES512,
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RS256 => "RS256",
            Self::ES256 => "ES256",
            Self::ES384 => "ES384",
            Self::ES512 => "ES512",
        };
        f.write_str(name)
    }
}

impl FromStr for KeyAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RS256" => Ok(Self::RS256),
            "ES256" => Ok(Self::ES256),
            "ES384" => Ok(Self::ES384),
            "ES512" => Ok(Self::ES512),
            other => Err(ConfigError::Invalid(format!(
                "Unknown key algorithm '{}'. Valid algorithms: RS256, ES256, ES384, ES512",
                other
            ))),
        }
    }
}

/// CSR subject fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CsrConfig {
    /// Common name (defaults to the first domain)
    #[serde(default)]
    pub common_name: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub organization_unit: Option<String>,
    #[serde(default)]
    pub locality: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    /// Two-letter country code
    #[serde(default)]
    pub country: Option<String>,
}

/// What the renewal loop does after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailMode {
    /// Return the error from the renewal loop, stopping it
    Unhandled,
    /// Log and try again at the normal interval
    LogAndContinue,
    /// Log and try again after the shorter retry interval
    #[default]
    LogAndRetry,
}

/// Renewal timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RenewalConfig {
    /// Seconds between two renewal checks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Renew when fewer than this many days remain before not-after
    #[serde(default = "default_lead_time_days")]
    pub lead_time_days: u32,

    #[serde(default)]
    pub fail_mode: FailMode,

    /// Seconds before the next check after a failure under `log-and-retry`
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Seconds between two challenge status polls
    #[serde(default = "default_validation_delay_secs")]
    pub validation_delay_secs: u64,

    /// Maximum number of challenge status polls
    #[serde(default = "default_validation_retries")]
    pub validation_retries: u32,
}

impl RenewalConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(u64::from(self.lead_time_days) * 86_400)
    }

    pub fn validation_delay(&self) -> Duration {
        Duration::from_secs(self.validation_delay_secs)
    }
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            lead_time_days: default_lead_time_days(),
            fail_mode: FailMode::default(),
            retry_interval_secs: default_retry_interval_secs(),
            validation_delay_secs: default_validation_delay_secs(),
            validation_retries: default_validation_retries(),
        }
    }
}

fn default_interval_secs() -> u64 {
    30
}

fn default_lead_time_days() -> u32 {
    30
}

fn default_retry_interval_secs() -> u64 {
    10
}

fn default_validation_delay_secs() -> u64 {
    2
}

fn default_validation_retries() -> u32 {
    60
}
