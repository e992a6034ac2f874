//! Error types

use std::fmt;
use std::io;

use thiserror::Error;

use crate::model::ChallengeKind;

/// Errors raised by store backends and the fan-out store
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Key outside the allowed character set
    #[error("Invalid store key '{0}'")]
    InvalidKey(String),

    /// Remote backend answered with an error
    #[error("Backend '{backend}' request failed: {message}")]
    Remote { backend: String, message: String },

    /// The certificate directory orders versions by not-after
    #[error("Backend '{backend}' needs a not-after date to store '{key}'")]
    MissingNotAfter { backend: String, key: String },

    /// A fan-out save that reached no backend
    #[error("Failed to save '{key}' to any of {count} backend(s)")]
    AllBackendsFailed { key: String, count: usize },

    /// Backend declaration cannot be turned into a backend
    #[error("Invalid backend configuration: {0}")]
    Configuration(String),
}

/// Errors raised while publishing DNS-01 records
#[derive(Debug, Error)]
pub enum DnsError {
    /// No managed zone contains the challenge record
    #[error("No DNS zone found for domain '{domain}'")]
    ZoneNotFound { domain: String },

    /// The resolver never returned a TXT record for the name
    #[error("TXT record '{record}' did not resolve after {attempts} attempt(s)")]
    NotResolved { record: String, attempts: u32 },

    /// The resolver returned TXT records, none carrying the token
    #[error("TXT record '{record}' resolved to {observed:?}, not the expected token")]
    WrongValue {
        record: String,
        observed: Vec<String>,
    },

    /// Zone API request failed
    #[error("DNS API request failed: {0}")]
    Api(String),

    /// Resolver lookup failed
    #[error("DNS lookup failed for '{record}': {message}")]
    Lookup { record: String, message: String },

    /// The attempt was cancelled while waiting for propagation
    #[error("DNS propagation check cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for DnsError {
    fn from(e: reqwest::Error) -> Self {
        DnsError::Api(e.to_string())
    }
}

/// One invalid challenge reported by the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeFailure {
    pub domain: String,
    pub kind: ChallengeKind,
    /// ACME problem type, e.g. `urn:ietf:params:acme:error:unauthorized`
    pub error_type: Option<String>,
    pub detail: Option<String>,
}

impl fmt::Display for ChallengeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.domain, self.kind)?;
        if let Some(ref error_type) = self.error_type {
            write!(f, " {}", error_type)?;
        }
        if let Some(ref detail) = self.detail {
            write!(f, ": {}", detail)?;
        }
        Ok(())
    }
}

/// Every invalid challenge of one order attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationFailures(pub Vec<ChallengeFailure>);

impl ValidationFailures {
    pub fn iter(&self) -> impl Iterator<Item = &ChallengeFailure> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", failure)?;
        }
        Ok(())
    }
}

/// Errors that can occur during an order attempt
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Rejected before any order was placed
    #[error("Invalid order configuration: {0}")]
    Configuration(String),

    /// Failed to create or load the ACME account
    #[error("ACME account error: {0}")]
    Account(String),

    /// ACME protocol error from the client
    #[error("ACME protocol error: {0}")]
    Protocol(String),

    /// The CA marked one or more challenges invalid
    #[error("Challenge validation failed: {0}")]
    Validation(ValidationFailures),

    /// No challenge became valid within the polling bound
    #[error("No challenge became valid after {attempts} poll(s)")]
    Timeout { attempts: u32 },

    /// The attempt was cancelled
    #[error("Order attempt cancelled")]
    Cancelled,

    /// Certificate finalization failed
    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    /// Key generation, CSR or PFX handling failed
    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),
}

impl AcmeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AcmeError::Cancelled | AcmeError::Dns(DnsError::Cancelled))
    }
}
