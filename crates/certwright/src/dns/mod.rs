//! DNS-01 challenge publishing
//!
//! # Flow
//!
//! 1. Find the managed zone holding `_acme-challenge.<domain>`
//! 2. Merge the token into the TXT record set, tagged with the ownership
//!    token of the current order attempt
//! 3. Poll an external resolver until the token is visible
//!
//! Zone management and resolution are behind [`DnsZoneClient`] and
//! [`TxtResolver`] so the publisher can be tested without a network.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DnsError;

mod http_zone;
mod publisher;
mod resolver;

pub use http_zone::HttpZoneClient;
pub use publisher::DnsChallengePublisher;
pub use resolver::HickoryTxtResolver;

/// Label of the challenge record
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Metadata key carrying the ownership token of the attempt that last
/// wrote a record set
pub const INSTANCE_METADATA_KEY: &str = "acme-instance";

/// A zone managed through the zone API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsZone {
    pub id: String,
    /// Zone apex, e.g. `example.com`
    pub name: String,
}

/// TXT record set as stored in a zone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxtRecordSet {
    pub ttl: u32,
    pub values: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl TxtRecordSet {
    pub fn owner(&self) -> Option<&str> {
        self.metadata.get(INSTANCE_METADATA_KEY).map(String::as_str)
    }
}

/// Zone management API
#[async_trait]
pub trait DnsZoneClient: Send + Sync {
    async fn list_zones(&self) -> Result<Vec<DnsZone>, DnsError>;

    /// Record set at `name` relative to the zone (`@` for the apex)
    async fn get_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
    ) -> Result<Option<TxtRecordSet>, DnsError>;

    /// Create or replace the record set at `name`
    async fn upsert_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
        record: &TxtRecordSet,
    ) -> Result<(), DnsError>;
}

/// Recursive resolver used to observe propagation
#[async_trait]
pub trait TxtResolver: Send + Sync {
    /// TXT values at `fqdn`; empty when the name does not resolve
    async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError>;
}

/// Lowercase, without wildcard prefix or trailing dot
pub fn normalize_domain(domain: &str) -> String {
    domain
        .trim_start_matches("*.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

/// `_acme-challenge.<domain>`
pub fn challenge_record_fqdn(domain: &str) -> String {
    format!("{}.{}", ACME_CHALLENGE_LABEL, normalize_domain(domain))
}

/// Longest zone equal to `fqdn` or a dot-suffix of it
pub fn find_matching_zone<'a>(zones: &'a [DnsZone], fqdn: &str) -> Option<&'a DnsZone> {
    let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();

    zones
        .iter()
        .filter(|zone| {
            let name = zone.name.trim_end_matches('.').to_ascii_lowercase();
            fqdn == name || fqdn.ends_with(&format!(".{}", name))
        })
        .max_by_key(|zone| zone.name.trim_end_matches('.').len())
}

/// Name of `fqdn` relative to `zone_name`; `@` for the apex itself
pub fn record_name_for_zone(fqdn: &str, zone_name: &str) -> String {
    let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();
    let zone_name = zone_name.trim_end_matches('.').to_ascii_lowercase();

    if fqdn == zone_name {
        return "@".to_string();
    }
    fqdn.strip_suffix(&format!(".{}", zone_name))
        .map(str::to_string)
        .unwrap_or(fqdn)
}
