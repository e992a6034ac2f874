//! ACME account credentials and issued certificates
//!
//! The account and the certificates usually live in different places: the
//! account key in one private backend, certificates wherever the TLS
//! servers read them from. Each gets its own fan-out.

use tracing::{debug, info, warn};

use certwright_common::SiteName;

use super::{FanoutStore, StoreEntry};
use crate::error::StorageError;
use crate::model::IssuedCertificate;
use crate::pfx;

/// Store key of the ACME account credentials
pub const ACCOUNT_KEY: &str = "acme-account";

#[derive(Clone)]
pub struct CertificateStore {
    accounts: FanoutStore,
    certificates: FanoutStore,
}

impl CertificateStore {
    pub fn new(accounts: FanoutStore, certificates: FanoutStore) -> Self {
        Self {
            accounts,
            certificates,
        }
    }

    /// Store key of a site certificate
    pub fn certificate_key(site: &SiteName) -> String {
        format!("{}.pfx", site)
    }

    /// Raw account credentials JSON, if an account was created before
    pub async fn load_account(&self) -> Option<String> {
        let data = self.accounts.load(ACCOUNT_KEY).await?;
        match String::from_utf8(data) {
            Ok(json) => {
                debug!("Loaded ACME account credentials");
                Some(json)
            }
            Err(_) => {
                warn!("Stored ACME account credentials are not UTF-8, ignoring");
                None
            }
        }
    }

    pub async fn save_account(&self, credentials_json: &str) -> Result<(), StorageError> {
        self.accounts
            .save(ACCOUNT_KEY, &StoreEntry::new(credentials_json.as_bytes()))
            .await?;
        info!("Saved ACME account credentials");
        Ok(())
    }

    pub async fn save_certificate(
        &self,
        site: &SiteName,
        certificate: &IssuedCertificate,
    ) -> Result<(), StorageError> {
        let entry =
            StoreEntry::new(certificate.pfx.clone()).with_not_after(certificate.not_after);
        self.certificates
            .save(&Self::certificate_key(site), &entry)
            .await?;

        info!(
            site = %site,
            subject = %certificate.subject,
            not_after = %certificate.not_after,
            "Saved certificate"
        );
        Ok(())
    }

    /// Raw PFX bytes of the current certificate
    pub async fn current_certificate(&self, site: &SiteName) -> Option<Vec<u8>> {
        self.certificates.load(&Self::certificate_key(site)).await
    }

    /// Current certificate opened with `password`.
    ///
    /// A bundle that cannot be opened is reported as missing so that the
    /// next renewal replaces it.
    pub async fn load_certificate(
        &self,
        site: &SiteName,
        password: &str,
    ) -> Option<IssuedCertificate> {
        let data = self.current_certificate(site).await?;
        match pfx::open(&data, password) {
            Ok(certificate) => Some(certificate),
            Err(e) => {
                warn!(site = %site, error = %e, "Stored certificate cannot be opened, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, StoreBackend};
    use std::sync::Arc;

    fn stores() -> (Arc<MemoryBackend>, Arc<MemoryBackend>, CertificateStore) {
        let accounts = Arc::new(MemoryBackend::new("accounts"));
        let certificates = Arc::new(MemoryBackend::new("certificates"));
        let store = CertificateStore::new(
            FanoutStore::new(vec![accounts.clone()]),
            FanoutStore::new(vec![certificates.clone()]),
        );
        (accounts, certificates, store)
    }

    #[tokio::test]
    async fn test_account_roundtrip() {
        let (accounts, certificates, store) = stores();
        assert_eq!(store.load_account().await, None);

        store.save_account(r#"{"id":"acct"}"#).await.unwrap();
        assert_eq!(store.load_account().await.as_deref(), Some(r#"{"id":"acct"}"#));
        assert!(accounts.contains(ACCOUNT_KEY));
        assert!(certificates.is_empty());
    }

    #[tokio::test]
    async fn test_certificate_keys_by_site() {
        let (_, certificates, store) = stores();
        let site = SiteName::new("shop");
        let certificate = IssuedCertificate {
            pfx: vec![1, 2, 3],
            not_after: chrono::Utc::now(),
            subject: "shop.example.com".to_string(),
        };

        store.save_certificate(&site, &certificate).await.unwrap();
        assert!(certificates.contains("shop.pfx"));
        assert_eq!(store.current_certificate(&site).await, Some(vec![1, 2, 3]));

        // Not a PKCS#12 bundle
        assert!(store.load_certificate(&site, "").await.is_none());
    }
}
