//! Values passed between the orchestrator, the publishers and the stores

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use certwright_config::{CsrConfig, KeyAlgorithm, SiteConfig};

/// ACME challenge type handled by Certwright
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http01 => f.write_str("http-01"),
            Self::Dns01 => f.write_str("dns-01"),
        }
    }
}

/// Proof material published for one authorization.
///
/// The record lives in the challenge store under `token` until the order
/// reaches a terminal state. For DNS-01 the token is the TXT digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    pub token: String,
    pub response: String,
    pub domain: String,
    pub kind: ChallengeKind,
}

/// What to order, built from the site options for each attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDescriptor {
    /// Domains in order; never empty for a placed order
    pub domains: Vec<String>,
    pub key_algorithm: KeyAlgorithm,
    pub csr: CsrConfig,
}

impl OrderDescriptor {
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            domains,
            key_algorithm: KeyAlgorithm::default(),
            csr: CsrConfig::default(),
        }
    }

    pub fn from_site(site: &SiteConfig) -> Self {
        Self {
            domains: site.domains.clone(),
            key_algorithm: site.key_algorithm,
            csr: site.csr.clone(),
        }
    }

    /// CSR common name: the configured one, else the first domain
    pub fn common_name(&self) -> Option<&str> {
        self.csr
            .common_name
            .as_deref()
            .or_else(|| self.domains.first().map(String::as_str))
    }
}

/// A certificate returned by a successful order
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// Password-protected PKCS#12 bundle of the key and the full chain
    pub pfx: Vec<u8>,
    pub not_after: DateTime<Utc>,
    /// Common name of the leaf certificate
    pub subject: String,
}

impl IssuedCertificate {
    /// Time left before expiry (negative once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.not_after - now
    }
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("pfx_len", &self.pfx.len())
            .field("not_after", &self.not_after)
            .field("subject", &self.subject)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_name_defaults_to_first_domain() {
        let mut descriptor =
            OrderDescriptor::new(vec!["www.example.com".to_string(), "example.com".to_string()]);
        assert_eq!(descriptor.common_name(), Some("www.example.com"));

        descriptor.csr.common_name = Some("example.com".to_string());
        assert_eq!(descriptor.common_name(), Some("example.com"));

        assert_eq!(OrderDescriptor::new(Vec::new()).common_name(), None);
    }

    #[test]
    fn test_descriptor_from_site() {
        let mut site = SiteConfig::new("shop", vec!["shop.example.com".to_string()]);
        site.key_algorithm = KeyAlgorithm::RS256;
        site.csr.organization = Some("Shop Ltd".to_string());

        let descriptor = OrderDescriptor::from_site(&site);
        assert_eq!(descriptor.domains, site.domains);
        assert_eq!(descriptor.key_algorithm, KeyAlgorithm::RS256);
        assert_eq!(descriptor.csr.organization.as_deref(), Some("Shop Ltd"));
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&ChallengeKind::Dns01).unwrap(),
            "\"dns-01\""
        );
        assert_eq!(ChallengeKind::Http01.to_string(), "http-01");
    }
}
