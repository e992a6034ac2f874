//! HTTP-01 challenge management
//!
//! Key authorizations are written to the [`ChallengeStore`] so any instance
//! sharing its backends can answer `/.well-known/acme-challenge/<token>`.

use tracing::{debug, trace};

use crate::acme::ChallengeContext;
use crate::error::StorageError;
use crate::model::{ChallengeKind, ChallengeRecord};
use crate::store::ChallengeStore;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Token part of a challenge request path
pub fn extract_token(path: &str) -> Option<&str> {
    path.strip_prefix(ACME_CHALLENGE_PREFIX)
        .filter(|token| !token.is_empty() && !token.contains('/'))
}

/// Writes HTTP-01 key authorizations into the challenge store
#[derive(Clone)]
pub struct HttpChallengePublisher {
    store: ChallengeStore,
}

impl HttpChallengePublisher {
    pub fn new(store: ChallengeStore) -> Self {
        Self { store }
    }

    /// Record served for `context`: the key authorization under its token
    pub fn record(context: &ChallengeContext) -> ChallengeRecord {
        ChallengeRecord {
            token: context.token.clone(),
            response: context.key_authorization.clone(),
            domain: context.domain.clone(),
            kind: ChallengeKind::Http01,
        }
    }

    pub async fn publish(
        &self,
        context: &ChallengeContext,
    ) -> Result<ChallengeRecord, StorageError> {
        let record = Self::record(context);
        self.store.save_record(&record).await?;
        debug!(domain = %record.domain, token = %record.token, "Registered HTTP-01 challenge");
        Ok(record)
    }
}

/// Lookup side of the challenge endpoint, for whatever HTTP listener
/// fronts the domains
#[derive(Clone)]
pub struct ChallengeResponder {
    store: ChallengeStore,
}

impl ChallengeResponder {
    pub fn new(store: ChallengeStore) -> Self {
        Self { store }
    }

    /// Key authorization for `token`, byte-for-byte as stored
    pub async fn response(&self, token: &str) -> Option<String> {
        let result = self.store.load(token).await;
        if result.is_some() {
            trace!(token = %token, "ACME challenge token found");
        } else {
            trace!(token = %token, "ACME challenge token not found");
        }
        result
    }

    /// Like [`response`](Self::response), from the full request path
    pub async fn response_for_path(&self, path: &str) -> Option<String> {
        let token = extract_token(path)?;
        self.response(token).await
    }
}
