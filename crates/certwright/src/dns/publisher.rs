//! DNS-01 record publication and propagation check

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certwright_common::{poll_until, InstanceId, PollEnd, PollError, RetryPolicy, Verdict};
use certwright_config::{DnsConfig, MatchMode};

use super::{
    challenge_record_fqdn, find_matching_zone, record_name_for_zone, DnsZone, DnsZoneClient,
    TxtRecordSet, TxtResolver, INSTANCE_METADATA_KEY,
};
use crate::error::DnsError;

/// TTL of challenge record sets
pub const DEFAULT_TTL: u32 = 3600;

/// Resolver polling: every 10 s, 10 times
pub const DEFAULT_PROPAGATION: RetryPolicy = RetryPolicy::new(10, Duration::from_secs(10));

/// Publishes DNS-01 tokens into managed zones.
///
/// Record sets are shared by every order that proves the same name (a
/// domain and its wildcard both use `_acme-challenge.<domain>`), so writes
/// are read-modify-write and serialized per publisher. The ownership token
/// of the attempt tags each set; values left by another attempt are
/// dropped on the first write.
pub struct DnsChallengePublisher {
    zones: Arc<dyn DnsZoneClient>,
    resolver: Arc<dyn TxtResolver>,
    ttl: u32,
    propagation: RetryPolicy,
    match_mode: MatchMode,
    zone_cache: RwLock<Option<Vec<DnsZone>>>,
    write_lock: Mutex<()>,
}

impl DnsChallengePublisher {
    pub fn new(zones: Arc<dyn DnsZoneClient>, resolver: Arc<dyn TxtResolver>) -> Self {
        Self {
            zones,
            resolver,
            ttl: DEFAULT_TTL,
            propagation: DEFAULT_PROPAGATION,
            match_mode: MatchMode::default(),
            zone_cache: RwLock::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &DnsConfig,
        zones: Arc<dyn DnsZoneClient>,
        resolver: Arc<dyn TxtResolver>,
    ) -> Self {
        Self::new(zones, resolver)
            .with_ttl(config.record_ttl)
            .with_propagation(RetryPolicy::new(
                config.propagation_retries,
                config.propagation_delay(),
            ))
            .with_match_mode(config.match_mode)
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_propagation(mut self, policy: RetryPolicy) -> Self {
        self.propagation = policy;
        self
    }

    pub fn with_match_mode(mut self, mode: MatchMode) -> Self {
        self.match_mode = mode;
        self
    }

    /// Zone holding the challenge record of `domain`.
    ///
    /// The zone list is cached; a miss refreshes it once.
    async fn zone_for(&self, domain: &str) -> Result<DnsZone, DnsError> {
        let fqdn = challenge_record_fqdn(domain);

        let cached = self.zone_cache.read().clone();
        if let Some(zones) = cached {
            if let Some(zone) = find_matching_zone(&zones, &fqdn) {
                return Ok(zone.clone());
            }
        }

        let zones = self.zones.list_zones().await?;
        let found = find_matching_zone(&zones, &fqdn).cloned();
        *self.zone_cache.write() = Some(zones);

        found.ok_or_else(|| DnsError::ZoneNotFound {
            domain: domain.to_string(),
        })
    }

    /// Fail unless every domain maps to a managed zone
    pub async fn ensure_zones(&self, domains: &[String]) -> Result<(), DnsError> {
        for domain in domains {
            let zone = self.zone_for(domain).await?;
            debug!(domain = %domain, zone = %zone.name, "Found DNS zone");
        }
        Ok(())
    }

    /// Add `token` to the TXT set of `_acme-challenge.<domain>`
    pub async fn publish(
        &self,
        domain: &str,
        token: &str,
        owner: &InstanceId,
    ) -> Result<(), DnsError> {
        let zone = self.zone_for(domain).await?;
        let fqdn = challenge_record_fqdn(domain);
        let name = record_name_for_zone(&fqdn, &zone.name);

        let _guard = self.write_lock.lock().await;

        let existing = self.zones.get_txt_record(&zone, &name).await?;
        let record = merge_token(existing, token, owner, self.ttl);
        self.zones.upsert_txt_record(&zone, &name, &record).await?;

        info!(
            domain = %domain,
            zone = %zone.name,
            record = %name,
            values = record.values.len(),
            "Published DNS-01 challenge record"
        );
        Ok(())
    }

    /// Poll the resolver until `token` is visible at the challenge record
    pub async fn wait_for_propagation(
        &self,
        domain: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DnsError> {
        let fqdn = challenge_record_fqdn(domain);
        let record = fqdn.as_str();
        let resolver = &self.resolver;
        let mode = self.match_mode;

        debug!(
            record = %fqdn,
            max_attempts = self.propagation.attempts(),
            "Waiting for DNS propagation"
        );

        let outcome = poll_until(
            &self.propagation,
            cancel,
            move |_| async move {
                match resolver.query_txt(record).await {
                    Ok(values) => Ok::<_, Infallible>(values),
                    Err(e) => {
                        warn!(record = %record, error = %e, "DNS lookup error");
                        Ok(Vec::new())
                    }
                }
            },
            |values: &Vec<String>| {
                if values.iter().any(|v| mode.matches(v, token)) {
                    Verdict::Done
                } else {
                    Verdict::Continue
                }
            },
        )
        .await
        .map_err(|e| match e {
            PollError::Cancelled { .. } => DnsError::Cancelled,
            PollError::Fetch(never) => match never {},
        })?;

        match outcome.end {
            PollEnd::Done => {
                debug!(record = %fqdn, attempts = outcome.attempts, "DNS propagation confirmed");
                Ok(())
            }
            _ if outcome.value.is_empty() => Err(DnsError::NotResolved {
                record: fqdn,
                attempts: outcome.attempts,
            }),
            _ => Err(DnsError::WrongValue {
                record: fqdn,
                observed: outcome.value,
            }),
        }
    }

    /// Publish `token` and wait until resolvers return it
    pub async fn publish_and_wait(
        &self,
        domain: &str,
        token: &str,
        owner: &InstanceId,
        cancel: &CancellationToken,
    ) -> Result<(), DnsError> {
        self.publish(domain, token, owner).await?;
        self.wait_for_propagation(domain, token, cancel).await
    }
}

/// Record set after adding `token` on behalf of `owner`
fn merge_token(
    existing: Option<TxtRecordSet>,
    token: &str,
    owner: &InstanceId,
    ttl: u32,
) -> TxtRecordSet {
    let mut record = match existing {
        Some(record) if record.owner() == Some(owner.as_str()) => record,
        Some(record) => {
            debug!(
                previous_owner = ?record.owner(),
                dropped = record.values.len(),
                "Replacing challenge values left by another attempt"
            );
            TxtRecordSet {
                values: Vec::new(),
                ..record
            }
        }
        None => TxtRecordSet::default(),
    };

    if !record.values.iter().any(|v| v == token) {
        record.values.push(token.to_string());
    }
    record.ttl = ttl;
    record
        .metadata
        .insert(INSTANCE_METADATA_KEY.to_string(), owner.as_str().to_string());
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dashmap::DashMap;

    #[derive(Default)]
    struct MockZones {
        zones: Vec<DnsZone>,
        records: DashMap<(String, String), TxtRecordSet>,
    }

    impl MockZones {
        fn with_zones(names: &[&str]) -> Self {
            Self {
                zones: names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| DnsZone {
                        id: format!("z{}", i),
                        name: name.to_string(),
                    })
                    .collect(),
                records: DashMap::new(),
            }
        }

        fn record(&self, zone_id: &str, name: &str) -> Option<TxtRecordSet> {
            self.records
                .get(&(zone_id.to_string(), name.to_string()))
                .map(|r| r.clone())
        }
    }

    #[async_trait]
    impl DnsZoneClient for MockZones {
        async fn list_zones(&self) -> Result<Vec<DnsZone>, DnsError> {
            Ok(self.zones.clone())
        }

        async fn get_txt_record(
            &self,
            zone: &DnsZone,
            name: &str,
        ) -> Result<Option<TxtRecordSet>, DnsError> {
            Ok(self.record(&zone.id, name))
        }

        async fn upsert_txt_record(
            &self,
            zone: &DnsZone,
            name: &str,
            record: &TxtRecordSet,
        ) -> Result<(), DnsError> {
            tokio::task::yield_now().await;
            self.records
                .insert((zone.id.clone(), name.to_string()), record.clone());
            Ok(())
        }
    }

    /// Resolver answering from a fixed list, or failing
    struct StaticResolver(Option<Vec<String>>);

    #[async_trait]
    impl TxtResolver for StaticResolver {
        async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError> {
            self.0.clone().ok_or_else(|| DnsError::Lookup {
                record: fqdn.to_string(),
                message: "SERVFAIL".to_string(),
            })
        }
    }

    fn publisher(zones: Arc<MockZones>, answers: Option<Vec<&str>>) -> DnsChallengePublisher {
        let resolver = StaticResolver(answers.map(|v| v.into_iter().map(String::from).collect()));
        DnsChallengePublisher::new(zones, Arc::new(resolver))
            .with_propagation(RetryPolicy::new(3, Duration::from_secs(10)))
    }

    #[tokio::test]
    async fn test_publish_tags_owner_and_ttl() {
        let zones = Arc::new(MockZones::with_zones(&["example.com", "dev.example.com"]));
        let owner = InstanceId::from_string("attempt-1");

        publisher(zones.clone(), None)
            .publish("api.dev.example.com", "token-a", &owner)
            .await
            .unwrap();

        let record = zones.record("z1", "_acme-challenge.api").unwrap();
        assert_eq!(record.values, vec!["token-a"]);
        assert_eq!(record.ttl, 3600);
        assert_eq!(record.owner(), Some("attempt-1"));
    }

    #[tokio::test]
    async fn test_same_owner_appends() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let owner = InstanceId::from_string("attempt-1");
        let publisher = publisher(zones.clone(), None);

        publisher.publish("example.com", "token-a", &owner).await.unwrap();
        publisher.publish("*.example.com", "token-b", &owner).await.unwrap();
        publisher.publish("example.com", "token-a", &owner).await.unwrap();

        let record = zones.record("z0", "_acme-challenge").unwrap();
        assert_eq!(record.values, vec!["token-a", "token-b"]);
    }

    #[tokio::test]
    async fn test_other_owner_values_dropped() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let publisher = publisher(zones.clone(), None);

        publisher
            .publish("example.com", "stale", &InstanceId::from_string("old"))
            .await
            .unwrap();
        publisher
            .publish("example.com", "fresh", &InstanceId::from_string("new"))
            .await
            .unwrap();

        let record = zones.record("z0", "_acme-challenge").unwrap();
        assert_eq!(record.values, vec!["fresh"]);
        assert_eq!(record.owner(), Some("new"));
    }

    #[tokio::test]
    async fn test_concurrent_publishes_keep_both_values() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let owner = InstanceId::from_string("attempt-1");
        let publisher = publisher(zones.clone(), None);

        let (a, b) = tokio::join!(
            publisher.publish("example.com", "token-a", &owner),
            publisher.publish("*.example.com", "token-b", &owner),
        );
        a.unwrap();
        b.unwrap();

        let mut values = zones.record("z0", "_acme-challenge").unwrap().values;
        values.sort();
        assert_eq!(values, vec!["token-a", "token-b"]);
    }

    #[tokio::test]
    async fn test_ensure_zones() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let publisher = publisher(zones, None);

        publisher
            .ensure_zones(&["example.com".to_string(), "*.example.com".to_string()])
            .await
            .unwrap();

        let result = publisher
            .ensure_zones(&["example.com".to_string(), "example.org".to_string()])
            .await;
        assert!(matches!(
            result,
            Err(DnsError::ZoneNotFound { domain }) if domain == "example.org"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_found() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let publisher = publisher(zones, Some(vec!["other", "token-a"]));

        publisher
            .wait_for_propagation("example.com", "token-a", &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_not_resolved() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let publisher = publisher(zones, None);

        let result = publisher
            .wait_for_propagation("example.com", "token-a", &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(DnsError::NotResolved { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_wrong_value() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let publisher = publisher(zones, Some(vec!["stale-token"]));

        let result = publisher
            .wait_for_propagation("example.com", "token-a", &CancellationToken::new())
            .await;
        match result {
            Err(DnsError::WrongValue { record, observed }) => {
                assert_eq!(record, "_acme-challenge.example.com");
                assert_eq!(observed, vec!["stale-token"]);
            }
            other => panic!("expected WrongValue, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_match_mode() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let contains = publisher(zones.clone(), Some(vec!["\"token-a\""]));
        contains
            .wait_for_propagation("example.com", "token-a", &CancellationToken::new())
            .await
            .unwrap();

        let exact = publisher(zones, Some(vec!["\"token-a\""])).with_match_mode(MatchMode::Exact);
        assert!(exact
            .wait_for_propagation("example.com", "token-a", &CancellationToken::new())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_propagation_cancelled() {
        let zones = Arc::new(MockZones::with_zones(&["example.com"]));
        let publisher = publisher(zones, Some(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = publisher
            .wait_for_propagation("example.com", "token-a", &cancel)
            .await;
        assert!(matches!(result, Err(DnsError::Cancelled)));
    }
}
