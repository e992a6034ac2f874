//! TXT lookups through public recursive resolvers

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use tracing::trace;

use super::TxtResolver;
use crate::error::DnsError;

/// Resolver with caching disabled, so every poll sees fresh answers
pub struct HickoryTxtResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryTxtResolver {
    /// Query `nameservers` over UDP; an empty list uses hickory's defaults
    pub fn new(nameservers: &[IpAddr]) -> Self {
        let config = if nameservers.is_empty() {
            ResolverConfig::default()
        } else {
            let mut config = ResolverConfig::new();
            for ip in nameservers {
                config.add_name_server(NameServerConfig::new(
                    SocketAddr::new(*ip, 53),
                    Protocol::Udp,
                ));
            }
            config
        };

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 3;
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>, DnsError> {
        // Absolute name, so no search domain gets appended
        let name = format!("{}.", fqdn.trim_end_matches('.'));

        match self.resolver.txt_lookup(name.as_str()).await {
            Ok(lookup) => {
                let values: Vec<String> = lookup
                    .iter()
                    .map(|txt| {
                        txt.txt_data()
                            .iter()
                            .map(|chunk| String::from_utf8_lossy(chunk))
                            .collect()
                    })
                    .collect();
                trace!(record = %fqdn, values = ?values, "Resolved TXT record");
                Ok(values)
            }
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Ok(Vec::new()),
                _ => Err(DnsError::Lookup {
                    record: fqdn.to_string(),
                    message: e.to_string(),
                }),
            },
        }
    }
}
