//! Type-safe identifier newtypes for Certwright.
//!
//! These types keep site names and ownership tokens from being mixed up
//! with the many other strings (domains, tokens, store keys) that flow
//! through an order.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Configured site name.
///
/// A site is one certificate: a set of domains renewed together and
/// stored under a single friendly name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteName(String);

impl SiteName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SiteName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Ownership token for one order attempt.
///
/// DNS-01 TXT record sets are tagged with the instance ID of the attempt
/// that wrote them. A later attempt carrying a different ID discards the
/// values it finds instead of appending to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new random instance ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_ids_are_unique() {
        let id1 = InstanceId::new();
        let id2 = InstanceId::new();
        let id3 = InstanceId::from_string("attempt-1");

        assert_ne!(id1, id2);
        assert_eq!(id3.as_str(), "attempt-1");
    }

    #[test]
    fn test_site_name() {
        let site = SiteName::new("example");
        assert_eq!(site.as_str(), "example");
        assert_eq!(site.to_string(), "example");
        assert_eq!(SiteName::from("example"), site);
    }
}
