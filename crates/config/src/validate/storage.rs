//! Store backend validation

use std::collections::HashSet;

use super::{ErrorCategory, ValidationError, ValidationResult};
use crate::{BackendKind, Config};

/// Validate backend declarations and every reference to them
pub fn validate_storage(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let storage = &config.storage;

    let mut names = HashSet::new();
    for backend in &storage.backends {
        if !names.insert(backend.name.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!("Backend '{}' is declared more than once", backend.name),
            ));
        }

        match backend.kind {
            BackendKind::Filesystem | BackendKind::CertificateDirectory => {
                if backend.path.is_none() {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Storage,
                        format!("Backend '{}' requires a 'path'", backend.name),
                    ));
                }
            }
            BackendKind::Blob => match backend.url.as_deref() {
                None => result.add_error(ValidationError::new(
                    ErrorCategory::Storage,
                    format!("Backend '{}' requires a 'url'", backend.name),
                )),
                Some(url) if url::Url::parse(url).is_err() => {
                    result.add_error(ValidationError::new(
                        ErrorCategory::Storage,
                        format!("Backend '{}' has an invalid url '{}'", backend.name, url),
                    ))
                }
                Some(_) => {
                    if let Err(e) = backend.resolve_sas_token() {
                        result.add_error(ValidationError::new(
                            ErrorCategory::Storage,
                            format!("Backend '{}': {}", backend.name, e),
                        ));
                    }
                }
            },
            BackendKind::Memory => {}
        }
    }

    check_references(
        config,
        "challenge-backends",
        &storage.challenge_backends,
        &mut result,
    );
    check_references(
        config,
        "certificate-backends",
        &storage.certificate_backends,
        &mut result,
    );

    for name in &storage.challenge_backends {
        if let Some(backend) = storage.backend(name) {
            if backend.kind == BackendKind::CertificateDirectory {
                result.add_error(ValidationError::new(
                    ErrorCategory::Storage,
                    format!(
                        "Backend '{}' is a certificate directory and cannot hold challenges",
                        name
                    ),
                ));
            }
        }
    }

    match storage.backend(&config.account.backend) {
        None => result.add_error(ValidationError::new(
            ErrorCategory::Account,
            format!(
                "Account backend '{}' is not declared in [[storage.backends]]",
                config.account.backend
            ),
        )),
        Some(backend) if backend.kind == BackendKind::CertificateDirectory => {
            result.add_error(ValidationError::new(
                ErrorCategory::Account,
                format!(
                    "Account backend '{}' is a certificate directory and cannot hold the account key",
                    backend.name
                ),
            ))
        }
        Some(_) => {}
    }

    result
}

fn check_references(
    config: &Config,
    field: &str,
    references: &[String],
    result: &mut ValidationResult,
) {
    if references.is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            format!("storage.{} must name at least one backend", field),
        ));
    }

    let mut seen = HashSet::new();
    for name in references {
        if config.storage.backend(name).is_none() {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!("storage.{} references unknown backend '{}'", field, name),
            ));
        }
        if !seen.insert(name.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Storage,
                format!("storage.{} lists backend '{}' twice", field, name),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountConfig, BackendConfig, StorageConfig};

    fn config_with(storage: StorageConfig, account_backend: &str) -> Config {
        Config {
            account: AccountConfig {
                email: "admin@example.com".to_string(),
                directory: None,
                staging: false,
                backend: account_backend.to_string(),
            },
            storage,
            dns: None,
            sites: Vec::new(),
        }
    }

    #[test]
    fn test_valid_storage() {
        let storage = StorageConfig {
            backends: vec![
                BackendConfig::filesystem("local", "/var/lib/certwright"),
                BackendConfig::memory("mem"),
            ],
            challenge_backends: vec!["mem".to_string(), "local".to_string()],
            certificate_backends: vec!["local".to_string()],
        };
        let result = validate_storage(&config_with(storage, "local"));
        assert!(result.is_ok(), "unexpected errors: {:?}", result.errors);
    }

    #[test]
    fn test_unknown_references() {
        let storage = StorageConfig {
            backends: vec![BackendConfig::memory("mem")],
            challenge_backends: vec!["nope".to_string()],
            certificate_backends: Vec::new(),
        };
        let result = validate_storage(&config_with(storage, "missing"));
        let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();

        assert!(messages.iter().any(|m| m.contains("unknown backend 'nope'")));
        assert!(messages
            .iter()
            .any(|m| m.contains("certificate-backends must name at least one")));
        assert!(messages
            .iter()
            .any(|m| m.contains("Account backend 'missing'")));
    }

    #[test]
    fn test_filesystem_requires_path() {
        let mut backend = BackendConfig::filesystem("local", "/tmp");
        backend.path = None;
        let storage = StorageConfig {
            backends: vec![backend],
            challenge_backends: vec!["local".to_string()],
            certificate_backends: vec!["local".to_string()],
        };
        let result = validate_storage(&config_with(storage, "local"));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("requires a 'path'")));
    }
}
