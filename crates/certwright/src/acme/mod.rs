//! ACME protocol boundary
//!
//! The orchestrator drives orders through [`AcmeClient`]; it never touches
//! the wire protocol. [`InstantAcmeClient`] is the production
//! implementation on top of `instant-acme`; tests plug in fakes.
//!
//! # Challenge Flow
//!
//! 1. `new_order` places the order for every domain
//! 2. `authorizations` lists what the CA wants proven
//! 3. `challenge` picks one challenge of an authorization and computes its
//!    key authorization
//! 4. the orchestrator publishes the proof, then `validate_challenge` asks
//!    the CA to check it
//! 5. `poll_challenge` reports the CA's verdict
//! 6. `finalize` submits the CSR and downloads the chain

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::AcmeError;
use crate::model::ChallengeKind;

mod instant;

pub use instant::{InstantAcmeClient, InstantOrder};

/// Authorization status as reported by the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    /// Revoked, expired or deactivated
    Other,
}

/// Challenge offered for an authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferedChallenge {
    pub kind: ChallengeKind,
    pub url: String,
    pub token: String,
}

/// One identifier the CA wants proven
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub domain: String,
    pub status: AuthorizationStatus,
    /// Challenges of a kind Certwright can answer
    pub challenges: Vec<OfferedChallenge>,
}

impl Authorization {
    pub fn offers(&self, kind: ChallengeKind) -> bool {
        self.challenges.iter().any(|c| c.kind == kind)
    }

    pub fn offered(&self, kind: ChallengeKind) -> Option<&OfferedChallenge> {
        self.challenges.iter().find(|c| c.kind == kind)
    }
}

/// A selected challenge with everything needed to publish and validate it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeContext {
    pub domain: String,
    pub kind: ChallengeKind,
    pub url: String,
    pub token: String,
    /// `<token>.<account key thumbprint>`
    pub key_authorization: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// ACME problem document attached to an invalid challenge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Problem {
    pub error_type: Option<String>,
    pub detail: Option<String>,
}

/// Latest known state of one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeState {
    pub status: ChallengeStatus,
    pub error: Option<Problem>,
}

impl ChallengeState {
    pub fn new(status: ChallengeStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }
}

/// Operations the orchestrator needs from an ACME client.
///
/// `Order` is an opaque handle owned by the client. Methods take it by
/// shared reference so per-challenge calls can run concurrently.
#[async_trait]
pub trait AcmeClient: Send + Sync {
    type Order: Send + Sync;

    /// Load the stored account or register a new one
    async fn load_or_create_account(&self) -> Result<(), AcmeError>;

    async fn new_order(&self, domains: &[String]) -> Result<Self::Order, AcmeError>;

    async fn authorizations(&self, order: &Self::Order) -> Result<Vec<Authorization>, AcmeError>;

    /// Challenge of `kind` for `authorization`, with its key authorization
    async fn challenge(
        &self,
        order: &Self::Order,
        authorization: &Authorization,
        kind: ChallengeKind,
    ) -> Result<ChallengeContext, AcmeError>;

    /// Tell the CA the proof is published
    async fn validate_challenge(
        &self,
        order: &Self::Order,
        context: &ChallengeContext,
    ) -> Result<(), AcmeError>;

    async fn poll_challenge(
        &self,
        order: &Self::Order,
        context: &ChallengeContext,
    ) -> Result<ChallengeState, AcmeError>;

    /// Submit the CSR and return the issued chain as PEM, leaf first
    async fn finalize(&self, order: &Self::Order, csr_der: &[u8]) -> Result<String, AcmeError>;

    /// TXT value proving a DNS-01 key authorization
    fn dns_txt_digest(&self, key_authorization: &str) -> String {
        dns_txt_digest(key_authorization)
    }
}

/// base64url(SHA-256(key authorization)) without padding
pub fn dns_txt_digest(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_authorization.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_txt_digest() {
        // RFC 8555 section 8.4: 43 characters, no padding
        let digest = dns_txt_digest("token.thumbprint");
        assert_eq!(digest.len(), 43);
        assert!(!digest.contains('='));
        assert!(!digest.contains('+'));
        assert!(!digest.contains('/'));
        assert_eq!(digest, dns_txt_digest("token.thumbprint"));
        assert_ne!(digest, dns_txt_digest("token.other"));
    }

    #[test]
    fn test_offered_lookup() {
        let authorization = Authorization {
            domain: "example.com".to_string(),
            status: AuthorizationStatus::Pending,
            challenges: vec![OfferedChallenge {
                kind: ChallengeKind::Dns01,
                url: "https://ca/chall/1".to_string(),
                token: "tok".to_string(),
            }],
        };

        assert!(authorization.offers(ChallengeKind::Dns01));
        assert!(!authorization.offers(ChallengeKind::Http01));
        assert_eq!(
            authorization.offered(ChallengeKind::Dns01).map(|c| c.token.as_str()),
            Some("tok")
        );
    }
}
