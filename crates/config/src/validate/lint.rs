//! Configuration linting for operational best practices
//!
//! Everything here is a warning: the configuration runs, but probably not
//! the way the operator intended.

use super::{ValidationResult, ValidationWarning};
use crate::{BackendKind, Config, FailMode};

/// Let's Encrypt certificates are valid for 90 days
const TYPICAL_LIFETIME_DAYS: u32 = 90;

/// Lint configuration for best practices
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    for site in &config.sites {
        let renewal = &site.renewal;

        if renewal.lead_time_days >= TYPICAL_LIFETIME_DAYS {
            result.add_warning(ValidationWarning::new(format!(
                "Site '{}' renews {} days before expiry; 90-day certificates will be renewed on every check",
                site.name, renewal.lead_time_days
            )));
        }

        if renewal.fail_mode == FailMode::LogAndRetry
            && renewal.retry_interval_secs >= renewal.interval_secs
        {
            result.add_warning(ValidationWarning::new(format!(
                "Site '{}' retries after {}s, which is not sooner than its {}s check interval",
                site.name, renewal.retry_interval_secs, renewal.interval_secs
            )));
        }

        if renewal.fail_mode == FailMode::Unhandled {
            result.add_warning(ValidationWarning::new(format!(
                "Site '{}' uses fail-mode 'unhandled': one failed renewal stops the process",
                site.name
            )));
        }

        if site.password.is_some() {
            result.add_warning(ValidationWarning::new(format!(
                "Site '{}' has an inline PFX password (consider password-env)",
                site.name
            )));
        }
    }

    let challenge_backends: Vec<_> = config
        .storage
        .challenge_backends
        .iter()
        .filter_map(|name| config.storage.backend(name))
        .collect();
    if !challenge_backends.is_empty()
        && challenge_backends
            .iter()
            .all(|b| b.kind == BackendKind::Memory)
    {
        result.add_warning(ValidationWarning::new(
            "Challenges are kept in memory only; other instances behind the same name cannot answer them",
        ));
    }

    if config.account.staging && config.account.directory.is_none() {
        result.add_warning(ValidationWarning::new(
            "Using the Let's Encrypt staging directory; issued certificates are not trusted",
        ));
    }

    result
}
