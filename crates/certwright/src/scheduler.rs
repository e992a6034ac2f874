//! Background certificate renewal scheduler
//!
//! One scheduler runs per site. Each tick loads the stored certificate,
//! renews it when it is missing or close to expiry, and decides how long
//! to sleep before the next tick according to the site's fail mode.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use certwright_common::SiteName;
use certwright_config::{FailMode, RenewalConfig, SiteConfig};

use crate::acme::AcmeClient;
use crate::error::AcmeError;
use crate::model::{IssuedCertificate, OrderDescriptor};
use crate::order::{OrderOrchestrator, PreferredChallenge};
use crate::store::CertificateStore;

/// Whether a certificate expiring at `not_after` is due for renewal.
///
/// Missing and expired certificates are always due.
pub fn needs_renewal(not_after: Option<DateTime<Utc>>, now: DateTime<Utc>, lead: Duration) -> bool {
    match not_after {
        None => true,
        Some(not_after) => match (not_after - now).to_std() {
            Ok(remaining) => remaining < lead,
            Err(_) => true,
        },
    }
}

/// Single-slot permit allowing one order in flight per site.
///
/// Clones share the slot.
#[derive(Clone, Default)]
pub struct RenewalGate {
    slot: Arc<Mutex<()>>,
}

/// Held for the duration of one renewal attempt; dropping it frees the gate
pub struct RenewalPermit {
    _guard: OwnedMutexGuard<()>,
}

impl RenewalGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The permit, unless an attempt is already running
    pub fn try_acquire(&self) -> Option<RenewalPermit> {
        self.slot
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| RenewalPermit { _guard: guard })
    }
}

/// Renewal bookkeeping of one site
#[derive(Debug, Clone, Default)]
pub struct RenewalState {
    pub last_attempt: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<String>,
    /// Delay chosen after the last tick
    pub next_delay: Option<Duration>,
    pub consecutive_failures: u32,
}

/// Latest certificate of a site, read lock-free by TLS handshakes
#[derive(Clone, Default)]
pub struct CurrentCertificate {
    inner: Arc<ArcSwapOption<IssuedCertificate>>,
}

impl CurrentCertificate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<IssuedCertificate>> {
        self.inner.load_full()
    }

    pub fn set(&self, certificate: IssuedCertificate) {
        self.inner.store(Some(Arc::new(certificate)));
    }

    /// Replace the held certificate only if `certificate` expires later
    pub fn offer(&self, certificate: &IssuedCertificate) {
        let newer = self
            .get()
            .map_or(true, |current| certificate.not_after > current.not_after);
        if newer {
            self.set(certificate.clone());
        }
    }
}

/// Background renewal loop for one site
pub struct RenewalScheduler<C: AcmeClient> {
    site: SiteName,
    descriptor: OrderDescriptor,
    selector: PreferredChallenge,
    /// PFX password
    password: String,
    friendly_name: String,
    renewal: RenewalConfig,
    orchestrator: Arc<OrderOrchestrator<C>>,
    store: CertificateStore,
    gate: RenewalGate,
    state: RwLock<RenewalState>,
    current: CurrentCertificate,
}

impl<C: AcmeClient> RenewalScheduler<C> {
    pub fn new(
        site: &SiteConfig,
        password: String,
        orchestrator: Arc<OrderOrchestrator<C>>,
        store: CertificateStore,
    ) -> Self {
        Self {
            site: SiteName::new(site.name.as_str()),
            descriptor: OrderDescriptor::from_site(site),
            selector: PreferredChallenge(site.challenge),
            password,
            friendly_name: site.friendly_name().to_string(),
            renewal: site.renewal.clone(),
            orchestrator,
            store,
            gate: RenewalGate::new(),
            state: RwLock::new(RenewalState::default()),
            current: CurrentCertificate::new(),
        }
    }

    /// Share the order slot with other schedulers of the same site
    pub fn with_gate(mut self, gate: RenewalGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_current(mut self, current: CurrentCertificate) -> Self {
        self.current = current;
        self
    }

    pub fn site(&self) -> &SiteName {
        &self.site
    }

    pub fn gate(&self) -> &RenewalGate {
        &self.gate
    }

    pub fn current(&self) -> &CurrentCertificate {
        &self.current
    }

    pub fn state(&self) -> RenewalState {
        self.state.read().clone()
    }

    /// Run until cancelled.
    ///
    /// Returns an error only under [`FailMode::Unhandled`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AcmeError> {
        info!(
            site = %self.site,
            interval_secs = self.renewal.interval_secs,
            lead_time_days = self.renewal.lead_time_days,
            fail_mode = ?self.renewal.fail_mode,
            "Starting certificate renewal scheduler"
        );

        loop {
            let delay = match self.tick(&cancel).await {
                Ok(delay) => delay,
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    error!(site = %self.site, error = %e, "Renewal failed, stopping scheduler");
                    return Err(e);
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(site = %self.site, "Renewal scheduler stopped");
        Ok(())
    }

    /// One check; returns the delay until the next one
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Duration, AcmeError> {
        let existing = self.store.load_certificate(&self.site, &self.password).await;
        if let Some(ref certificate) = existing {
            self.current.offer(certificate);
        }

        let not_after = existing.as_ref().map(|c| c.not_after);
        if !needs_renewal(not_after, Utc::now(), self.renewal.lead_time()) {
            debug!(site = %self.site, not_after = ?not_after, "Certificate is still valid");
            return Ok(self.record_delay(self.renewal.interval()));
        }

        info!(site = %self.site, not_after = ?not_after, "Certificate needs renewal");

        match self.trigger(cancel).await {
            Ok(_) => Ok(self.record_delay(self.renewal.interval())),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => match self.renewal.fail_mode {
                FailMode::Unhandled => Err(e),
                FailMode::LogAndContinue => {
                    error!(site = %self.site, error = %e, "Certificate renewal failed");
                    Ok(self.record_delay(self.renewal.interval()))
                }
                FailMode::LogAndRetry => {
                    error!(
                        site = %self.site,
                        error = %e,
                        retry_in_secs = self.renewal.retry_interval_secs,
                        "Certificate renewal failed, retrying"
                    );
                    Ok(self.record_delay(self.renewal.retry_interval()))
                }
            },
        }
    }

    /// Run one renewal attempt now.
    ///
    /// Returns `None` when another attempt for the site holds the gate.
    pub async fn trigger(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<IssuedCertificate>, AcmeError> {
        let Some(_permit) = self.gate.try_acquire() else {
            info!(site = %self.site, "Renewal already in progress, skipping");
            return Ok(None);
        };

        self.state.write().last_attempt = Some(Utc::now());

        let result = self.renew(cancel).await;

        let mut state = self.state.write();
        match result {
            Ok(certificate) => {
                state.last_success = Some(Utc::now());
                state.last_failure = None;
                state.consecutive_failures = 0;
                Ok(Some(certificate))
            }
            Err(e) => {
                state.last_failure = Some(e.to_string());
                state.consecutive_failures += 1;
                Err(e)
            }
        }
    }

    async fn renew(&self, cancel: &CancellationToken) -> Result<IssuedCertificate, AcmeError> {
        let started = std::time::Instant::now();

        let certificate = self
            .orchestrator
            .execute(
                &self.descriptor,
                &self.selector,
                &self.password,
                &self.friendly_name,
                cancel,
            )
            .await?;

        // Consumers only see what the next tick can load back
        self.store.save_certificate(&self.site, &certificate).await?;
        self.current.set(certificate.clone());

        info!(
            site = %self.site,
            not_after = %certificate.not_after,
            elapsed_secs = started.elapsed().as_secs(),
            "Certificate renewed"
        );
        Ok(certificate)
    }

    fn record_delay(&self, delay: Duration) -> Duration {
        self.state.write().next_delay = Some(delay);
        delay
    }
}
