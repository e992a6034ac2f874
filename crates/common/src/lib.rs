//! Shared building blocks for Certwright.
//!
//! - [`ids`]: identifier newtypes (sites, order-attempt ownership tokens)
//! - [`retry`]: the bounded "poll until predicate or bound" primitive used by
//!   challenge validation and DNS propagation checks

pub mod ids;
pub mod retry;

pub use ids::{InstanceId, SiteName};
pub use retry::{poll_until, PollEnd, PollError, PollOutcome, RetryPolicy, Verdict};
