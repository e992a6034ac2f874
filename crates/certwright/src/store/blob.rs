//! HTTP blob container backend
//!
//! Blobs live at `<container url>/<prefix><key>`. Authentication is either
//! a shared access signature appended as query string or a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::{debug, trace};

use certwright_config::BackendConfig;

use super::{StoreBackend, StoreEntry};
use crate::error::StorageError;

/// Header marking a whole-blob upload
const BLOB_TYPE_HEADER: &str = "x-ms-blob-type";
/// Expiry of the stored certificate, when known
const NOT_AFTER_HEADER: &str = "x-ms-meta-notafter";

pub struct BlobBackend {
    name: String,
    container_url: String,
    prefix: String,
    sas_token: Option<String>,
    bearer_token: Option<String>,
    client: Client,
}

impl BlobBackend {
    pub fn new(
        name: impl Into<String>,
        container_url: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            name: name.into(),
            container_url: container_url.trim_end_matches('/').to_string(),
            prefix: String::new(),
            sas_token: None,
            bearer_token: None,
            client,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, StorageError> {
        let url = config.url.as_deref().ok_or_else(|| {
            StorageError::Configuration(format!("backend '{}' requires a url", config.name))
        })?;

        let mut backend = Self::new(&config.name, url, config.timeout())?;
        backend.prefix = config.prefix.clone().unwrap_or_default();
        backend.sas_token = config
            .resolve_sas_token()
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        backend.bearer_token = config
            .resolve_bearer_token()
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        Ok(backend)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_sas_token(mut self, token: impl Into<String>) -> Self {
        self.sas_token = Some(token.into());
        self
    }

    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    fn blob_url(&self, key: &str) -> String {
        let mut url = format!("{}/{}{}", self.container_url, self.prefix, key);
        if let Some(ref sas) = self.sas_token {
            url.push('?');
            url.push_str(sas.trim_start_matches('?'));
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.bearer_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn remote_error(&self, message: impl Into<String>) -> StorageError {
        StorageError::Remote {
            backend: self.name.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl StoreBackend for BlobBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn save(&self, key: &str, entry: &StoreEntry) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put(self.blob_url(key))
            .header(BLOB_TYPE_HEADER, "BlockBlob")
            .body(entry.data.clone());
        if let Some(not_after) = entry.not_after {
            request = request.header(NOT_AFTER_HEADER, not_after.to_rfc3339());
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.remote_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(self.remote_error(format!("PUT {} returned {}", key, status)));
        }

        trace!(backend = %self.name, key = %key, "Uploaded blob");
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let response = self
            .authorize(self.client.get(self.blob_url(key)))
            .send()
            .await
            .map_err(|e| self.remote_error(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                trace!(backend = %self.name, key = %key, "Blob not found");
                Ok(None)
            }
            status if status.is_success() => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| self.remote_error(e.to_string()))?;
                Ok(Some(body.to_vec()))
            }
            status => Err(self.remote_error(format!("GET {} returned {}", key, status))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let response = self
            .authorize(self.client.delete(self.blob_url(key)))
            .send()
            .await
            .map_err(|e| self.remote_error(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => {
                debug!(backend = %self.name, key = %key, "Deleted blob");
                Ok(())
            }
            status => Err(self.remote_error(format!("DELETE {} returned {}", key, status))),
        }
    }
}
