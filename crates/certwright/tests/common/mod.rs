//! Fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rcgen::{CertificateParams, DnType, KeyPair};

use certwright::acme::{
    AcmeClient, Authorization, AuthorizationStatus, ChallengeContext, ChallengeState,
    ChallengeStatus, OfferedChallenge, Problem,
};
use certwright::dns::{DnsZone, DnsZoneClient, TxtRecordSet, TxtResolver};
use certwright::store::{FanoutStore, MemoryBackend, StoreBackend, StoreEntry};
use certwright::{
    AcmeError, CertificateStore, ChallengeKind, ChallengeStore, DnsError, StorageError,
};

pub const PASSWORD: &str = "pfx-password";

/// Pending authorization offering `kinds`
pub fn authorization(domain: &str, kinds: &[ChallengeKind]) -> Authorization {
    let label = domain.replace('*', "star");
    Authorization {
        domain: domain.to_string(),
        status: AuthorizationStatus::Pending,
        challenges: kinds
            .iter()
            .map(|kind| OfferedChallenge {
                kind: *kind,
                url: challenge_url(domain, *kind),
                token: format!("tok-{}-{}", label, kind),
            })
            .collect(),
    }
}

pub fn challenge_url(domain: &str, kind: ChallengeKind) -> String {
    format!("https://ca.test/chall/{}/{}", domain, kind)
}

pub fn invalid(detail: &str) -> ChallengeState {
    ChallengeState {
        status: ChallengeStatus::Invalid,
        error: Some(Problem {
            error_type: Some("urn:ietf:params:acme:error:unauthorized".to_string()),
            detail: Some(detail.to_string()),
        }),
    }
}

/// Self-signed certificate valid until `days` from now, as PEM
fn self_signed(common_name: &str, names: &[String], days: i64) -> String {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(names.to_vec()).unwrap();
    params.distinguished_name.push(DnType::CommonName, common_name);
    let not_after = Utc::now() + chrono::Duration::days(days);
    params.not_after = rcgen::date_time_ymd(
        not_after.year(),
        not_after.month() as u8,
        not_after.day() as u8,
    );
    params.self_signed(&key).unwrap().pem()
}

/// Leaf for `domains` plus one intermediate, leaf first
pub fn chain(domains: &[&str], days: i64) -> String {
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    format!(
        "{}{}",
        self_signed(domains[0], &names, days),
        self_signed("Fake Intermediate", &[], days + 365)
    )
}

/// Opaque order handle of [`FakeAcme`]
pub struct FakeOrder {
    pub id: usize,
}

/// Scripted CA.
///
/// Challenge states are returned from a per-URL script; the last state of
/// a script repeats. Challenges without a script turn valid immediately.
pub struct FakeAcme {
    authorizations: Mutex<Vec<Authorization>>,
    scripts: Mutex<HashMap<String, VecDeque<ChallengeState>>>,
    chain: Mutex<String>,
    finalize_delay: Duration,
    /// Challenge URLs whose validation request is refused
    refused: Mutex<HashSet<String>>,
    /// Store checked for the proof when a challenge is submitted
    probe: Option<ChallengeStore>,

    pub accounts_loaded: AtomicUsize,
    pub orders_placed: AtomicUsize,
    pub polls: AtomicUsize,
    pub finalized: AtomicUsize,
    pub validated: Mutex<Vec<String>>,
    /// Stored response seen by each validation request
    pub probed: Mutex<Vec<Option<String>>>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeAcme {
    pub fn new(authorizations: Vec<Authorization>, chain: String) -> Self {
        Self {
            authorizations: Mutex::new(authorizations),
            scripts: Mutex::new(HashMap::new()),
            chain: Mutex::new(chain),
            finalize_delay: Duration::ZERO,
            refused: Mutex::new(HashSet::new()),
            probe: None,
            accounts_loaded: AtomicUsize::new(0),
            orders_placed: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            finalized: AtomicUsize::new(0),
            validated: Mutex::new(Vec::new()),
            probed: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_probe(mut self, store: ChallengeStore) -> Self {
        self.probe = Some(store);
        self
    }

    pub fn with_finalize_delay(mut self, delay: Duration) -> Self {
        self.finalize_delay = delay;
        self
    }

    /// Answer the validation request for `url` with an error
    pub fn refuse(&self, url: &str) {
        self.refused.lock().insert(url.to_string());
    }

    pub fn script(&self, url: &str, states: Vec<ChallengeState>) {
        self.scripts.lock().insert(url.to_string(), states.into());
    }

    pub fn set_chain(&self, chain: String) {
        *self.chain.lock() = chain;
    }

    pub fn set_authorizations(&self, authorizations: Vec<Authorization>) {
        *self.authorizations.lock() = authorizations;
    }

    pub fn orders(&self) -> usize {
        self.orders_placed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AcmeClient for FakeAcme {
    type Order = FakeOrder;

    async fn load_or_create_account(&self) -> Result<(), AcmeError> {
        self.accounts_loaded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> Result<FakeOrder, AcmeError> {
        assert!(!domains.is_empty());
        let id = self.orders_placed.fetch_add(1, Ordering::SeqCst);
        Ok(FakeOrder { id })
    }

    async fn authorizations(&self, _order: &FakeOrder) -> Result<Vec<Authorization>, AcmeError> {
        Ok(self.authorizations.lock().clone())
    }

    async fn challenge(
        &self,
        _order: &FakeOrder,
        authorization: &Authorization,
        kind: ChallengeKind,
    ) -> Result<ChallengeContext, AcmeError> {
        let offered = authorization
            .offered(kind)
            .ok_or_else(|| AcmeError::Protocol(format!("{} not offered", kind)))?;
        Ok(ChallengeContext {
            domain: authorization.domain.clone(),
            kind,
            url: offered.url.clone(),
            token: offered.token.clone(),
            key_authorization: format!("{}.thumbprint", offered.token),
        })
    }

    async fn validate_challenge(
        &self,
        _order: &FakeOrder,
        context: &ChallengeContext,
    ) -> Result<(), AcmeError> {
        if let Some(ref store) = self.probe {
            let key = match context.kind {
                ChallengeKind::Http01 => context.token.clone(),
                ChallengeKind::Dns01 => self.dns_txt_digest(&context.key_authorization),
            };
            let seen = store.load(&key).await;
            self.probed.lock().push(seen);
        }
        if self.refused.lock().contains(&context.url) {
            return Err(AcmeError::Protocol(format!(
                "failed to set challenge ready for '{}': connection reset",
                context.domain
            )));
        }
        self.validated.lock().push(context.url.clone());
        Ok(())
    }

    async fn poll_challenge(
        &self,
        _order: &FakeOrder,
        context: &ChallengeContext,
    ) -> Result<ChallengeState, AcmeError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let mut scripts = self.scripts.lock();
        let state = match scripts.get_mut(&context.url) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().cloned(),
            None => None,
        };
        Ok(state.unwrap_or_else(|| ChallengeState::new(ChallengeStatus::Valid)))
    }

    async fn finalize(&self, _order: &FakeOrder, csr_der: &[u8]) -> Result<String, AcmeError> {
        assert!(!csr_der.is_empty());
        self.finalized.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.finalize_delay.is_zero() {
            tokio::time::sleep(self.finalize_delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(self.chain.lock().clone())
    }
}

/// Memory backend recording saves and counting deletes per key
pub struct CountingBackend {
    inner: MemoryBackend,
    pub deletes: DashMap<String, usize>,
    saves: Mutex<Vec<(String, Vec<u8>)>>,
    refuse_saves: AtomicBool,
}

impl CountingBackend {
    pub fn new(name: &str) -> Self {
        Self {
            inner: MemoryBackend::new(name),
            deletes: DashMap::new(),
            saves: Mutex::new(Vec::new()),
            refuse_saves: AtomicBool::new(false),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }

    pub fn deletes_of(&self, key: &str) -> usize {
        self.deletes.get(key).map(|n| *n).unwrap_or(0)
    }

    /// Data of every save of `key`, in order
    pub fn saves_of(&self, key: &str) -> Vec<Vec<u8>> {
        self.saves
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Fail every later save
    pub fn refuse_saves(&self) {
        self.refuse_saves.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreBackend for CountingBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError> {
        if self.refuse_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Remote {
                backend: self.name().to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        self.saves
            .lock()
            .push((key.to_string(), entry.data.clone()));
        self.inner.save(key, entry).await
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.inner.load(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        *self.deletes.entry(key.to_string()).or_insert(0) += 1;
        self.inner.delete(key).await
    }
}

/// Challenge store over a counting backend
pub fn challenge_store() -> (Arc<CountingBackend>, ChallengeStore) {
    let backend = Arc::new(CountingBackend::new("challenges"));
    let store = ChallengeStore::new(FanoutStore::new(vec![backend.clone()]));
    (backend, store)
}

/// Certificate store with separate in-memory account and certificate backends
pub fn certificate_store() -> (Arc<CountingBackend>, CertificateStore) {
    let certificates = Arc::new(CountingBackend::new("certificates"));
    let store = CertificateStore::new(
        FanoutStore::new(vec![Arc::new(MemoryBackend::new("accounts"))]),
        FanoutStore::new(vec![certificates.clone()]),
    );
    (certificates, store)
}

/// Zone API keeping record sets in memory
#[derive(Default)]
pub struct FakeZones {
    pub zones: Vec<DnsZone>,
    pub records: DashMap<String, TxtRecordSet>,
}

impl FakeZones {
    pub fn new(zones: &[&str]) -> Self {
        Self {
            zones: zones
                .iter()
                .enumerate()
                .map(|(i, name)| DnsZone {
                    id: format!("zone-{}", i),
                    name: name.to_string(),
                })
                .collect(),
            records: DashMap::new(),
        }
    }

    fn fqdn(zone: &DnsZone, name: &str) -> String {
        if name == "@" {
            zone.name.clone()
        } else {
            format!("{}.{}", name, zone.name)
        }
    }
}

#[async_trait]
impl DnsZoneClient for FakeZones {
    async fn list_zones(&self) -> Result<Vec<DnsZone>, DnsError> {
        Ok(self.zones.clone())
    }

    async fn get_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
    ) -> Result<Option<TxtRecordSet>, DnsError> {
        Ok(self.records.get(&Self::fqdn(zone, name)).map(|r| r.clone()))
    }

    async fn upsert_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
        record: &TxtRecordSet,
    ) -> Result<(), DnsError> {
        self.records.insert(Self::fqdn(zone, name), record.clone());
        Ok(())
    }
}

/// Resolver answering straight from [`FakeZones`]
pub struct ZoneResolver(pub Arc<FakeZones>);

#[async_trait]
impl TxtResolver for ZoneResolver {
    async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError> {
        Ok(self
            .0
            .records
            .get(fqdn)
            .map(|r| r.values.clone())
            .unwrap_or_default())
    }
}
