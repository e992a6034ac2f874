//! JSON zone management API
//!
//! ```text
//! GET {url}/zones
//!   200 {"zones": [{"id": "z1", "name": "example.com"}]}
//!
//! GET {url}/zones/{id}/txt/{name}
//!   200 {"ttl": 3600, "values": ["..."], "metadata": {"acme-instance": "..."}}
//!   404 when the record set does not exist
//!
//! PUT {url}/zones/{id}/txt/{name}
//!   body as returned by GET; 200 or 204
//! ```
//!
//! Requests carry `Authorization: Bearer <token>` when a token is set.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};

use certwright_config::DnsConfig;

use super::{DnsZone, DnsZoneClient, TxtRecordSet};
use crate::error::DnsError;

#[derive(Debug, Deserialize)]
struct ZoneList {
    zones: Vec<DnsZone>,
}

#[derive(Debug)]
pub struct HttpZoneClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpZoneClient {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DnsError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DnsError::Api(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn from_config(config: &DnsConfig) -> Result<Self, DnsError> {
        let token = config
            .resolve_api_token()
            .map_err(|e| DnsError::Api(e.to_string()))?;
        Self::new(&config.api_url, token, config.api_timeout())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_token {
            Some(ref token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn record_url(&self, zone: &DnsZone, name: &str) -> String {
        format!("{}/zones/{}/txt/{}", self.base_url, zone.id, name)
    }
}

#[async_trait]
impl DnsZoneClient for HttpZoneClient {
    async fn list_zones(&self) -> Result<Vec<DnsZone>, DnsError> {
        let response = self
            .authorize(self.client.get(format!("{}/zones", self.base_url)))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DnsError::Api(format!("listing zones returned {}", status)));
        }

        let list: ZoneList = response.json().await?;
        debug!(zones = list.zones.len(), "Listed DNS zones");
        Ok(list.zones)
    }

    async fn get_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
    ) -> Result<Option<TxtRecordSet>, DnsError> {
        let response = self
            .authorize(self.client.get(self.record_url(zone, name)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                trace!(zone = %zone.name, name = %name, "TXT record set not found");
                Ok(None)
            }
            status if status.is_success() => Ok(Some(response.json().await?)),
            status => Err(DnsError::Api(format!(
                "reading TXT '{}' in zone '{}' returned {}",
                name, zone.name, status
            ))),
        }
    }

    async fn upsert_txt_record(
        &self,
        zone: &DnsZone,
        name: &str,
        record: &TxtRecordSet,
    ) -> Result<(), DnsError> {
        let response = self
            .authorize(self.client.put(self.record_url(zone, name)))
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DnsError::Api(format!(
                "writing TXT '{}' in zone '{}' returned {}: {}",
                name, zone.name, status, body
            )));
        }

        debug!(zone = %zone.name, name = %name, values = record.values.len(), "Upserted TXT record set");
        Ok(())
    }
}
