//! DNS-01 publisher options.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{resolve_secret, ConfigError};

/// DNS section; required as soon as a site may use DNS-01
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DnsConfig {
    /// Base URL of the zone management API
    pub api_url: String,

    /// Bearer token given inline
    #[serde(default)]
    pub api_token: Option<String>,

    /// Environment variable holding the bearer token
    #[serde(default)]
    pub api_token_env: Option<String>,

    /// Timeout of zone API requests
    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// TTL of the challenge TXT record set
    #[serde(default = "default_record_ttl")]
    pub record_ttl: u32,

    /// Seconds between two resolver queries
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,

    /// Maximum number of resolver queries
    #[serde(default = "default_propagation_retries")]
    pub propagation_retries: u32,

    /// How an observed TXT value is compared to the expected token
    #[serde(default)]
    pub match_mode: MatchMode,

    /// Recursive resolvers to query (empty = system configuration)
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<IpAddr>,
}

impl DnsConfig {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_token: None,
            api_token_env: None,
            api_timeout_secs: default_api_timeout_secs(),
            record_ttl: default_record_ttl(),
            propagation_delay_secs: default_propagation_delay_secs(),
            propagation_retries: default_propagation_retries(),
            match_mode: MatchMode::default(),
            nameservers: default_nameservers(),
        }
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }

    pub fn resolve_api_token(&self) -> Result<Option<String>, ConfigError> {
        resolve_secret(self.api_token.as_deref(), self.api_token_env.as_deref())
    }
}

/// TXT value comparison used by the propagation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// The token appears somewhere in a TXT value
    #[default]
    Contains,
    /// A TXT value equals the token
    Exact,
}

impl MatchMode {
    pub fn matches(&self, observed: &str, expected: &str) -> bool {
        match self {
            Self::Contains => observed.contains(expected),
            Self::Exact => observed == expected,
        }
    }
}

fn default_api_timeout_secs() -> u64 {
    30
}

fn default_record_ttl() -> u32 {
    3600
}

fn default_propagation_delay_secs() -> u64 {
    10
}

fn default_propagation_retries() -> u32 {
    10
}

fn default_nameservers() -> Vec<IpAddr> {
    vec![
        IpAddr::from([8, 8, 8, 8]), // Google DNS
        IpAddr::from([1, 1, 1, 1]), // Cloudflare DNS
        IpAddr::from([9, 9, 9, 9]), // Quad9
    ]
}
