//! Certwright Library
//!
//! Automated TLS certificate issuance and renewal over ACME (RFC 8555).
//!
//! - **Stores**: fan-out/fallback persistence of challenge responses, the
//!   ACME account and issued certificates across filesystem, HTTP blob,
//!   in-memory and certificate-directory backends
//! - **Challenges**: HTTP-01 responses served from the challenge store,
//!   DNS-01 TXT records published through a zone API and confirmed against
//!   public resolvers
//! - **Orders**: placement, validation and finalization into a
//!   password-protected PKCS#12 bundle
//! - **Renewal**: a per-site scheduler with configurable failure handling
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use certwright::{InstantAcmeClient, OrderOrchestrator, RenewalScheduler};
//!
//! let client = Arc::new(InstantAcmeClient::new(directory, email, store.clone()));
//! let orchestrator = Arc::new(OrderOrchestrator::new(client, challenges));
//! let scheduler = RenewalScheduler::new(&site, password, orchestrator, store);
//! scheduler.run(cancel).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod dns;
pub mod error;
pub mod http;
pub mod model;
pub mod order;
pub mod pfx;
pub mod scheduler;
pub mod store;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Errors
pub use error::{AcmeError, ChallengeFailure, DnsError, StorageError, ValidationFailures};

// Data model
pub use model::{ChallengeKind, ChallengeRecord, IssuedCertificate, OrderDescriptor};

// ACME client boundary
pub use acme::{AcmeClient, InstantAcmeClient};

// Challenge publishing
pub use dns::{DnsChallengePublisher, HickoryTxtResolver, HttpZoneClient};
pub use http::{ChallengeResponder, HttpChallengePublisher};

// Orders and renewal
pub use order::{ChallengeSelector, OrderOrchestrator, PreferredChallenge, StartedOrder};
pub use scheduler::{CurrentCertificate, RenewalGate, RenewalScheduler, RenewalState};

// Storage
pub use store::{BackendRegistry, CertificateStore, ChallengeStore, FanoutStore, StoreBackend};
