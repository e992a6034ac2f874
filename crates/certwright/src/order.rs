//! Order orchestration
//!
//! One order attempt moves through
//!
//! ```text
//! Started -> AuthorizationsFetched -> ChallengesPublished -> Validating
//!   -> Valid -> Finalizing -> Completed
//!   -> Invalid -> Failed
//! ```
//!
//! and every challenge record it wrote is removed from the challenge store
//! whichever way it ends. The orchestrator hands the issued certificate
//! back to its caller; it never writes to the certificate store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use certwright_common::{poll_until, InstanceId, PollEnd, PollError, RetryPolicy, Verdict};
use certwright_config::ChallengePreference;

use crate::acme::{
    AcmeClient, Authorization, AuthorizationStatus, ChallengeContext, ChallengeState,
    ChallengeStatus,
};
use crate::dns::DnsChallengePublisher;
use crate::error::{AcmeError, ChallengeFailure, ValidationFailures};
use crate::http::HttpChallengePublisher;
use crate::model::{ChallengeKind, ChallengeRecord, IssuedCertificate, OrderDescriptor};
use crate::pfx;
use crate::store::ChallengeStore;

/// Validation polling: every 2 s, 60 times
pub const DEFAULT_VALIDATION: RetryPolicy = RetryPolicy::new(60, Duration::from_secs(2));

/// Picks the challenge kind used to prove one authorization
pub trait ChallengeSelector: Send + Sync {
    fn select(&self, authorization: &Authorization) -> Result<ChallengeKind, AcmeError>;

    /// Whether any authorization of an order for `domains` may go to DNS-01
    fn may_use_dns(&self, domains: &[String]) -> bool;
}

/// Selector following a site's configured preference
#[derive(Debug, Clone, Copy)]
pub struct PreferredChallenge(pub ChallengePreference);

impl PreferredChallenge {
    fn require(
        authorization: &Authorization,
        kind: ChallengeKind,
    ) -> Result<ChallengeKind, AcmeError> {
        if authorization.offers(kind) {
            Ok(kind)
        } else {
            Err(AcmeError::Protocol(format!(
                "'{}' does not offer {}",
                authorization.domain, kind
            )))
        }
    }
}

impl ChallengeSelector for PreferredChallenge {
    fn select(&self, authorization: &Authorization) -> Result<ChallengeKind, AcmeError> {
        match self.0 {
            ChallengePreference::Http01 => Self::require(authorization, ChallengeKind::Http01),
            ChallengePreference::Dns01 => Self::require(authorization, ChallengeKind::Dns01),
            ChallengePreference::Auto => {
                // Wildcard authorizations only ever offer dns-01
                if !authorization.domain.starts_with("*.")
                    && authorization.offers(ChallengeKind::Http01)
                {
                    Ok(ChallengeKind::Http01)
                } else {
                    Self::require(authorization, ChallengeKind::Dns01)
                }
            }
        }
    }

    fn may_use_dns(&self, domains: &[String]) -> bool {
        self.0.may_use_dns(domains)
    }
}

/// An order whose challenges are published and ready for validation
pub struct StartedOrder<O> {
    pub order: O,
    pub records: Vec<ChallengeRecord>,
    pub contexts: Vec<ChallengeContext>,
    /// Ownership token of this attempt, tagged onto DNS record sets
    pub instance: InstanceId,
}

/// Drives one order from placement to an issued certificate
pub struct OrderOrchestrator<C: AcmeClient> {
    client: Arc<C>,
    challenges: ChallengeStore,
    http: HttpChallengePublisher,
    dns: Option<Arc<DnsChallengePublisher>>,
    validation: RetryPolicy,
}

impl<C: AcmeClient> OrderOrchestrator<C> {
    pub fn new(client: Arc<C>, challenges: ChallengeStore) -> Self {
        Self {
            client,
            http: HttpChallengePublisher::new(challenges.clone()),
            challenges,
            dns: None,
            validation: DEFAULT_VALIDATION,
        }
    }

    pub fn with_dns(mut self, dns: Arc<DnsChallengePublisher>) -> Self {
        self.dns = Some(dns);
        self
    }

    pub fn with_validation(mut self, policy: RetryPolicy) -> Self {
        self.validation = policy;
        self
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Place the order and publish a proof for every pending authorization
    pub async fn start_order(
        &self,
        descriptor: &OrderDescriptor,
        selector: &dyn ChallengeSelector,
        cancel: &CancellationToken,
    ) -> Result<StartedOrder<C::Order>, AcmeError> {
        if descriptor.domains.is_empty() {
            return Err(AcmeError::Configuration(
                "an order needs at least one domain".to_string(),
            ));
        }

        let dns_checked = selector.may_use_dns(&descriptor.domains);
        if dns_checked {
            self.ensure_dns(&descriptor.domains).await?;
        }

        self.client.load_or_create_account().await?;
        let order = self.client.new_order(&descriptor.domains).await?;
        let authorizations = self.client.authorizations(&order).await?;

        let contexts = self.select_challenges(&order, &authorizations, selector).await;

        // Offered challenges are only known once the order exists, so an
        // automatic fall back to dns-01 is checked here, before any write
        if !dns_checked {
            let dns_domains: Vec<String> = contexts
                .iter()
                .filter(|context| context.kind == ChallengeKind::Dns01)
                .map(|context| context.domain.clone())
                .collect();
            if !dns_domains.is_empty() {
                self.ensure_dns(&dns_domains).await?;
            }
        }
        let pending = authorizations
            .iter()
            .filter(|authz| authz.status != AuthorizationStatus::Valid)
            .count();
        if contexts.is_empty() && pending > 0 {
            return Err(AcmeError::Protocol(format!(
                "no usable challenge for {} pending authorization(s)",
                pending
            )));
        }

        let records: Vec<ChallengeRecord> = contexts
            .iter()
            .map(|context| self.record_for(context))
            .collect();
        let instance = InstanceId::new();

        if let Err(e) = self.publish(&contexts, &records, &instance, cancel).await {
            self.cleanup(&records).await;
            return Err(e);
        }

        info!(
            domains = ?descriptor.domains,
            challenges = contexts.len(),
            instance = %instance,
            "Order started, challenges published"
        );

        Ok(StartedOrder {
            order,
            records,
            contexts,
            instance,
        })
    }

    /// Validate the published challenges, finalize and bundle the result.
    ///
    /// The challenge records of `started` are deleted on every exit path.
    pub async fn complete_order(
        &self,
        started: StartedOrder<C::Order>,
        descriptor: &OrderDescriptor,
        password: &str,
        friendly_name: &str,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, AcmeError> {
        let result = self
            .validate_and_finalize(&started, descriptor, password, friendly_name, cancel)
            .await;
        self.cleanup(&started.records).await;
        result
    }

    /// [`start_order`](Self::start_order) then [`complete_order`](Self::complete_order)
    pub async fn execute(
        &self,
        descriptor: &OrderDescriptor,
        selector: &dyn ChallengeSelector,
        password: &str,
        friendly_name: &str,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, AcmeError> {
        let started = self.start_order(descriptor, selector, cancel).await?;
        self.complete_order(started, descriptor, password, friendly_name, cancel)
            .await
    }

    /// Fail unless a DNS publisher manages a zone for every domain
    async fn ensure_dns(&self, domains: &[String]) -> Result<(), AcmeError> {
        let dns = self.dns.as_ref().ok_or_else(|| {
            AcmeError::Configuration("dns-01 requires a DNS publisher".to_string())
        })?;
        dns.ensure_zones(domains).await?;
        Ok(())
    }

    async fn select_challenges(
        &self,
        order: &C::Order,
        authorizations: &[Authorization],
        selector: &dyn ChallengeSelector,
    ) -> Vec<ChallengeContext> {
        let mut seen = HashSet::new();
        let mut contexts = Vec::new();

        for authorization in authorizations {
            if authorization.status == AuthorizationStatus::Valid {
                debug!(domain = %authorization.domain, "Authorization already valid, skipping");
                continue;
            }

            let kind = match selector.select(authorization) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(domain = %authorization.domain, error = %e, "No challenge selected");
                    continue;
                }
            };

            if !seen.insert((authorization.domain.clone(), kind)) {
                continue;
            }

            match self.client.challenge(order, authorization, kind).await {
                Ok(context) => contexts.push(context),
                Err(e) => {
                    warn!(
                        domain = %authorization.domain,
                        kind = %kind,
                        error = %e,
                        "Failed to prepare challenge"
                    );
                }
            }
        }

        contexts
    }

    fn record_for(&self, context: &ChallengeContext) -> ChallengeRecord {
        match context.kind {
            ChallengeKind::Http01 => HttpChallengePublisher::record(context),
            ChallengeKind::Dns01 => ChallengeRecord {
                token: self.client.dns_txt_digest(&context.key_authorization),
                response: context.key_authorization.clone(),
                domain: context.domain.clone(),
                kind: ChallengeKind::Dns01,
            },
        }
    }

    /// Store every record, then publish and confirm the DNS-01 ones
    async fn publish(
        &self,
        contexts: &[ChallengeContext],
        records: &[ChallengeRecord],
        instance: &InstanceId,
        cancel: &CancellationToken,
    ) -> Result<(), AcmeError> {
        let saves = contexts.iter().zip(records).map(|(context, record)| async move {
            match context.kind {
                ChallengeKind::Http01 => self.http.publish(context).await.map(|_| ()),
                ChallengeKind::Dns01 => self.challenges.save_record(record).await,
            }
        });
        for result in join_all(saves).await {
            result?;
        }

        let dns_records: Vec<&ChallengeRecord> = records
            .iter()
            .filter(|record| record.kind == ChallengeKind::Dns01)
            .collect();
        if dns_records.is_empty() {
            return Ok(());
        }

        let dns = self.dns.as_ref().ok_or_else(|| {
            AcmeError::Configuration("dns-01 requires a DNS publisher".to_string())
        })?;
        let publishes = dns_records.iter().map(|record| {
            dns.publish_and_wait(&record.domain, &record.token, instance, cancel)
        });
        for result in join_all(publishes).await {
            result?;
        }

        Ok(())
    }

    async fn validate_and_finalize(
        &self,
        started: &StartedOrder<C::Order>,
        descriptor: &OrderDescriptor,
        password: &str,
        friendly_name: &str,
        cancel: &CancellationToken,
    ) -> Result<IssuedCertificate, AcmeError> {
        if started.contexts.is_empty() {
            debug!("All authorizations already valid");
        } else {
            self.validate(started, cancel).await?;
        }

        let key = pfx::generate_key(descriptor.key_algorithm)?;
        let csr = pfx::build_csr(descriptor, &key)?;

        let chain = tokio::select! {
            _ = cancel.cancelled() => return Err(AcmeError::Cancelled),
            chain = self.client.finalize(&started.order, &csr) => chain?,
        };

        let bundle = pfx::bundle(&chain, &key, password, friendly_name)?;
        let issued = pfx::open(&bundle, password)?;

        info!(
            subject = %issued.subject,
            not_after = %issued.not_after,
            "Certificate issued"
        );
        Ok(issued)
    }

    /// Ask the CA to check every challenge and wait for its verdicts
    async fn validate(
        &self,
        started: &StartedOrder<C::Order>,
        cancel: &CancellationToken,
    ) -> Result<(), AcmeError> {
        let client = &self.client;
        let order = &started.order;

        let requests = started
            .contexts
            .iter()
            .map(|context| client.validate_challenge(order, context));
        let mut rejected = Vec::new();
        for (context, result) in started.contexts.iter().zip(join_all(requests).await) {
            if let Err(e) = result {
                warn!(
                    domain = %context.domain,
                    kind = %context.kind,
                    error = %e,
                    "Challenge validation request failed"
                );
                rejected.push(ChallengeFailure {
                    domain: context.domain.clone(),
                    kind: context.kind,
                    error_type: None,
                    detail: Some(e.to_string()),
                });
            }
        }
        // A challenge the CA never started checking stays pending, so the
        // order could not become ready
        if !rejected.is_empty() {
            return Err(AcmeError::Validation(ValidationFailures(rejected)));
        }

        let active = &started.contexts;
        let http_only = active.iter().all(|c| c.kind == ChallengeKind::Http01);

        let outcome = poll_until(
            &self.validation,
            cancel,
            move |_| async move {
                let polls = active.iter().map(|context| client.poll_challenge(order, context));
                join_all(polls).await.into_iter().collect::<Result<Vec<_>, _>>()
            },
            |states: &Vec<ChallengeState>| validation_verdict(states, http_only),
        )
        .await
        .map_err(|e| match e {
            PollError::Cancelled { .. } => AcmeError::Cancelled,
            PollError::Fetch(e) => e,
        })?;

        let failures: Vec<ChallengeFailure> = active
            .iter()
            .zip(&outcome.value)
            .filter(|(_, state)| state.status == ChallengeStatus::Invalid)
            .map(|(context, state)| ChallengeFailure {
                domain: context.domain.clone(),
                kind: context.kind,
                error_type: state.error.as_ref().and_then(|p| p.error_type.clone()),
                detail: state.error.as_ref().and_then(|p| p.detail.clone()),
            })
            .collect();

        if !failures.is_empty() {
            let failures = ValidationFailures(failures);
            warn!(failures = %failures, "Challenge validation failed");
            return Err(AcmeError::Validation(failures));
        }

        match outcome.end {
            PollEnd::Done => {
                info!(
                    challenges = active.len(),
                    attempts = outcome.attempts,
                    "All challenges validated"
                );
                Ok(())
            }
            _ => Err(AcmeError::Timeout {
                attempts: outcome.attempts,
            }),
        }
    }

    async fn cleanup(&self, records: &[ChallengeRecord]) {
        join_all(records.iter().map(|record| self.challenges.delete(&record.token))).await;
        if !records.is_empty() {
            debug!(records = records.len(), "Removed challenge records");
        }
    }
}

/// Done once something is valid and nothing is still being checked.
/// HTTP-01-only orders stop early when every challenge is invalid.
fn validation_verdict(states: &[ChallengeState], http_only: bool) -> Verdict {
    let in_flight = states
        .iter()
        .any(|s| matches!(s.status, ChallengeStatus::Pending | ChallengeStatus::Processing));
    let any_valid = states.iter().any(|s| s.status == ChallengeStatus::Valid);
    let all_invalid = states.iter().all(|s| s.status == ChallengeStatus::Invalid);

    if any_valid && !in_flight {
        Verdict::Done
    } else if http_only && all_invalid {
        Verdict::Stop
    } else {
        Verdict::Continue
    }
}
