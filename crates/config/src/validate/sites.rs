//! Site and account validation

use std::collections::HashSet;

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::Config;

/// Validate the account section and every site
pub fn validate_sites(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    if !config.account.email.contains('@') {
        result.add_error(ValidationError::new(
            ErrorCategory::Account,
            format!(
                "Account email '{}' is not an email address",
                config.account.email
            ),
        ));
    }

    if let Some(ref directory) = config.account.directory {
        if url::Url::parse(directory).is_err() {
            result.add_error(ValidationError::new(
                ErrorCategory::Account,
                format!("ACME directory '{}' is not a valid URL", directory),
            ));
        }
    }

    if config.sites.is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Site,
            "No sites configured",
        ));
    }

    let mut names = HashSet::new();
    for site in &config.sites {
        if !names.insert(site.name.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!("Site '{}' is defined more than once", site.name),
            ));
        }

        if !is_valid_site_name(&site.name) {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!(
                    "Site name '{}' may only contain letters, digits, '-', '_' and '.'",
                    site.name
                ),
            ));
        }

        if site.domains.is_empty() {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!("Site '{}' has no domains", site.name),
            ));
        }

        let mut seen = HashSet::new();
        for domain in &site.domains {
            if !is_valid_domain(domain) {
                result.add_error(ValidationError::new(
                    ErrorCategory::Site,
                    format!("Site '{}' has an invalid domain '{}'", site.name, domain),
                ));
            }
            if !seen.insert(domain.to_ascii_lowercase()) {
                result.add_error(ValidationError::new(
                    ErrorCategory::Site,
                    format!("Site '{}' lists domain '{}' twice", site.name, domain),
                ));
            }
        }

        if site.challenge.may_use_dns(&site.domains) && config.dns.is_none() {
            result.add_error(ValidationError::new(
                ErrorCategory::Dns,
                format!(
                    "Site '{}' uses DNS-01 challenges but no [dns] section is configured",
                    site.name
                ),
            ));
        }

        if site.challenge == crate::ChallengePreference::Http01 {
            if let Some(wildcard) = site.domains.iter().find(|d| d.starts_with("*.")) {
                result.add_error(ValidationError::new(
                    ErrorCategory::Site,
                    format!(
                        "Site '{}': wildcard domain '{}' requires the dns-01 or auto challenge",
                        site.name, wildcard
                    ),
                ));
            }
        }

        if let Some(ref country) = site.csr.country {
            if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
                result.add_error(ValidationError::new(
                    ErrorCategory::Site,
                    format!(
                        "Site '{}': CSR country '{}' must be a two-letter code",
                        site.name, country
                    ),
                ));
            }
        }

        let renewal = &site.renewal;
        if renewal.interval_secs == 0 {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!("Site '{}': renewal interval must be positive", site.name),
            ));
        }
        if renewal.validation_retries == 0 {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!("Site '{}': validation retries must be positive", site.name),
            ));
        }
        if renewal.lead_time_days == 0 {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!("Site '{}': lead time must be at least one day", site.name),
            ));
        }

        if let Err(e) = site.resolve_password() {
            result.add_error(ValidationError::new(
                ErrorCategory::Site,
                format!("Site '{}': {}", site.name, e),
            ));
        }
    }

    if let Some(ref dns) = config.dns {
        if url::Url::parse(&dns.api_url).is_err() {
            result.add_error(ValidationError::new(
                ErrorCategory::Dns,
                format!("DNS API URL '{}' is not a valid URL", dns.api_url),
            ));
        }
        if dns.propagation_retries == 0 {
            result.add_error(ValidationError::new(
                ErrorCategory::Dns,
                "DNS propagation retries must be positive",
            ));
        }
        if let Err(e) = dns.resolve_api_token() {
            result.add_error(ValidationError::new(ErrorCategory::Dns, e.to_string()));
        }
    }

    result
}

/// Site names become store keys and file names
pub fn is_valid_site_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn is_valid_domain(domain: &str) -> bool {
    let name = domain.strip_prefix("*.").unwrap_or(domain);
    !name.is_empty()
        && name.len() <= 253
        && name.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountConfig, ChallengePreference, SiteConfig, StorageConfig};

    fn config_with(sites: Vec<SiteConfig>) -> Config {
        Config {
            account: AccountConfig {
                email: "admin@example.com".to_string(),
                directory: None,
                staging: false,
                backend: "local".to_string(),
            },
            storage: StorageConfig::default(),
            dns: None,
            sites,
        }
    }

    #[test]
    fn test_valid_site() {
        let config = config_with(vec![SiteConfig::new(
            "example",
            vec!["example.com".to_string(), "www.example.com".to_string()],
        )]);
        let result = validate_sites(&config);
        assert!(result.is_ok(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn test_reports_all_problems() {
        let mut dns_site = SiteConfig::new("wild", vec!["*.example.com".to_string()]);
        dns_site.challenge = ChallengePreference::Dns01;

        let config = config_with(vec![
            SiteConfig::new("empty", vec![]),
            SiteConfig::new("empty", vec!["bad domain".to_string()]),
            dns_site,
        ]);

        let result = validate_sites(&config);
        let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();

        assert!(messages.iter().any(|m| m.contains("has no domains")));
        assert!(messages.iter().any(|m| m.contains("defined more than once")));
        assert!(messages.iter().any(|m| m.contains("invalid domain")));
        assert!(messages.iter().any(|m| m.contains("no [dns] section")));
    }

    #[test]
    fn test_wildcard_needs_dns() {
        let config = config_with(vec![SiteConfig::new(
            "wild",
            vec!["*.example.com".to_string()],
        )]);
        let result = validate_sites(&config);
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("requires the dns-01")));
    }

    #[test]
    fn test_site_name_rules() {
        assert!(is_valid_site_name("example.com-2026"));
        assert!(!is_valid_site_name("../etc"));
        assert!(!is_valid_site_name("a/b"));
        assert!(!is_valid_site_name(""));
    }

    #[test]
    fn test_domain_rules() {
        assert!(is_valid_domain("example.com"));
        assert!(is_valid_domain("*.example.com"));
        assert!(!is_valid_domain("-bad.example.com"));
        assert!(!is_valid_domain("a..b"));
        assert!(!is_valid_domain("*.*.example.com"));
    }
}
