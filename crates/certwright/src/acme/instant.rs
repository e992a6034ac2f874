//! [`AcmeClient`] on top of `instant-acme`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{Account, AccountCredentials, Identifier, NewAccount, NewOrder, OrderStatus};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, trace};

use super::{
    AcmeClient, Authorization, AuthorizationStatus, ChallengeContext, ChallengeState,
    ChallengeStatus, OfferedChallenge, Problem,
};
use crate::error::AcmeError;
use crate::model::ChallengeKind;
use crate::store::CertificateStore;

/// Delay between order status checks while finalizing
const FINALIZE_POLL_DELAY: Duration = Duration::from_secs(2);
/// Status checks before giving up on finalization
const FINALIZE_POLL_ATTEMPTS: u32 = 30;

/// ACME client for Let's Encrypt and compatible CAs.
///
/// The account is loaded from the certificate store on first use, or
/// registered and saved there when none exists.
pub struct InstantAcmeClient {
    directory_url: String,
    email: String,
    store: Arc<CertificateStore>,
    account: OnceCell<Account>,
}

/// Order handle plus the authorizations last fetched for it
pub struct InstantOrder {
    inner: Mutex<OrderInner>,
}

struct OrderInner {
    order: instant_acme::Order,
    authorizations: Vec<instant_acme::Authorization>,
}

impl OrderInner {
    fn find_challenge(&self, url: &str) -> Option<&instant_acme::Challenge> {
        self.find(url).map(|(_, challenge)| challenge)
    }

    /// Challenge at `url` together with the authorization owning it
    fn find(
        &self,
        url: &str,
    ) -> Option<(&instant_acme::Authorization, &instant_acme::Challenge)> {
        self.authorizations.iter().find_map(|authz| {
            authz
                .challenges
                .iter()
                .find(|challenge| challenge.url == url)
                .map(|challenge| (authz, challenge))
        })
    }
}

impl InstantAcmeClient {
    pub fn new(
        directory_url: impl Into<String>,
        email: impl Into<String>,
        store: Arc<CertificateStore>,
    ) -> Self {
        Self {
            directory_url: directory_url.into(),
            email: email.into(),
            store,
            account: OnceCell::new(),
        }
    }

    async fn account(&self) -> Result<&Account, AcmeError> {
        self.account
            .get_or_try_init(|| async {
                match self.store.load_account().await {
                    Some(json) => self.restore_account(&json).await,
                    None => self.register_account().await,
                }
            })
            .await
    }

    async fn restore_account(&self, json: &str) -> Result<Account, AcmeError> {
        let credentials: AccountCredentials = serde_json::from_str(json)
            .map_err(|e| AcmeError::Account(format!("failed to deserialize credentials: {}", e)))?;

        let account = Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Account(e.to_string()))?;

        info!("Loaded existing ACME account");
        Ok(account)
    }

    async fn register_account(&self) -> Result<Account, AcmeError> {
        info!(
            email = %self.email,
            directory = %self.directory_url,
            "Creating new ACME account"
        );

        let contact = format!("mailto:{}", self.email);
        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| AcmeError::Account(e.to_string()))?;

        let json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| AcmeError::Account(format!("failed to serialize credentials: {}", e)))?;
        self.store.save_account(&json).await?;

        info!("ACME account created");
        Ok(account)
    }
}

fn convert_authorization(authz: &instant_acme::Authorization) -> Authorization {
    let domain = match &authz.identifier {
        Identifier::Dns(domain) => domain.clone(),
    };

    let status = match authz.status {
        instant_acme::AuthorizationStatus::Pending => AuthorizationStatus::Pending,
        instant_acme::AuthorizationStatus::Valid => AuthorizationStatus::Valid,
        instant_acme::AuthorizationStatus::Invalid => AuthorizationStatus::Invalid,
        _ => AuthorizationStatus::Other,
    };

    let challenges = authz
        .challenges
        .iter()
        .filter_map(|challenge| {
            let kind = match challenge.r#type {
                instant_acme::ChallengeType::Http01 => ChallengeKind::Http01,
                instant_acme::ChallengeType::Dns01 => ChallengeKind::Dns01,
                _ => return None,
            };
            Some(OfferedChallenge {
                kind,
                url: challenge.url.clone(),
                token: challenge.token.clone(),
            })
        })
        .collect();

    Authorization {
        domain,
        status,
        challenges,
    }
}

/// Challenge state derived from the status of its authorization.
///
/// `instant-acme` keeps the per-challenge status private. An authorization
/// settles as soon as one of its challenges does, so its status stands in
/// for the challenge we answered. Revoked and expired count as invalid.
fn convert_state(
    status: instant_acme::AuthorizationStatus,
    problem: Option<&instant_acme::Problem>,
) -> ChallengeState {
    let status = match status {
        instant_acme::AuthorizationStatus::Pending => ChallengeStatus::Pending,
        instant_acme::AuthorizationStatus::Valid => ChallengeStatus::Valid,
        instant_acme::AuthorizationStatus::Invalid
        | instant_acme::AuthorizationStatus::Revoked
        | instant_acme::AuthorizationStatus::Expired => ChallengeStatus::Invalid,
    };

    ChallengeState {
        status,
        error: problem.map(|problem| Problem {
            error_type: problem.r#type.clone(),
            detail: problem.detail.clone(),
        }),
    }
}

#[async_trait]
impl AcmeClient for InstantAcmeClient {
    type Order = InstantOrder;

    async fn load_or_create_account(&self) -> Result<(), AcmeError> {
        self.account().await.map(|_| ())
    }

    async fn new_order(&self, domains: &[String]) -> Result<InstantOrder, AcmeError> {
        let account = self.account().await?;
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|domain| Identifier::Dns(domain.clone()))
            .collect();

        info!(domains = ?domains, "Creating certificate order");
        let order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to create order: {}", e)))?;

        Ok(InstantOrder {
            inner: Mutex::new(OrderInner {
                order,
                authorizations: Vec::new(),
            }),
        })
    }

    async fn authorizations(&self, order: &InstantOrder) -> Result<Vec<Authorization>, AcmeError> {
        let mut inner = order.inner.lock().await;
        let authorizations = inner
            .order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to get authorizations: {}", e)))?;

        let converted = authorizations.iter().map(convert_authorization).collect();
        inner.authorizations = authorizations;
        Ok(converted)
    }

    async fn challenge(
        &self,
        order: &InstantOrder,
        authorization: &Authorization,
        kind: ChallengeKind,
    ) -> Result<ChallengeContext, AcmeError> {
        let offered = authorization.offered(kind).ok_or_else(|| {
            AcmeError::Protocol(format!(
                "no {} challenge offered for '{}'",
                kind, authorization.domain
            ))
        })?;

        let inner = order.inner.lock().await;
        let challenge = inner.find_challenge(&offered.url).ok_or_else(|| {
            AcmeError::Protocol(format!("unknown challenge URL {}", offered.url))
        })?;
        let key_authorization = inner.order.key_authorization(challenge);

        Ok(ChallengeContext {
            domain: authorization.domain.clone(),
            kind,
            url: offered.url.clone(),
            token: offered.token.clone(),
            key_authorization: key_authorization.as_str().to_string(),
        })
    }

    async fn validate_challenge(
        &self,
        order: &InstantOrder,
        context: &ChallengeContext,
    ) -> Result<(), AcmeError> {
        debug!(domain = %context.domain, url = %context.url, "Setting challenge ready");
        order
            .inner
            .lock()
            .await
            .order
            .set_challenge_ready(&context.url)
            .await
            .map_err(|e| {
                AcmeError::Protocol(format!(
                    "failed to set challenge ready for '{}': {}",
                    context.domain, e
                ))
            })
    }

    async fn poll_challenge(
        &self,
        order: &InstantOrder,
        context: &ChallengeContext,
    ) -> Result<ChallengeState, AcmeError> {
        let mut inner = order.inner.lock().await;
        inner.authorizations = inner
            .order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Protocol(format!("failed to refresh authorizations: {}", e)))?;

        let state = inner
            .find(&context.url)
            .map(|(authz, challenge)| convert_state(authz.status, challenge.error.as_ref()))
            .ok_or_else(|| {
                AcmeError::Protocol(format!("challenge {} disappeared from order", context.url))
            })?;

        trace!(domain = %context.domain, status = ?state.status, "Polled challenge");
        Ok(state)
    }

    async fn finalize(&self, order: &InstantOrder, csr_der: &[u8]) -> Result<String, AcmeError> {
        let mut inner = order.inner.lock().await;
        let order = &mut inner.order;

        let mut attempts = 0;
        loop {
            order
                .refresh()
                .await
                .map_err(|e| AcmeError::Finalization(format!("failed to refresh order: {}", e)))?;
            let state = order.state();
            let status = state.status.clone();
            let problem = state.error.as_ref().and_then(|p| p.detail.clone());

            match status {
                OrderStatus::Ready => {
                    info!("Finalizing certificate order");
                    order
                        .finalize(csr_der)
                        .await
                        .map_err(|e| AcmeError::Finalization(e.to_string()))?;
                }
                OrderStatus::Valid => {
                    if let Some(chain) = order
                        .certificate()
                        .await
                        .map_err(|e| AcmeError::Finalization(e.to_string()))?
                    {
                        debug!(bytes = chain.len(), "Downloaded certificate chain");
                        return Ok(chain);
                    }
                }
                OrderStatus::Invalid => {
                    return Err(AcmeError::Finalization(
                        problem.unwrap_or_else(|| "order became invalid".to_string()),
                    ));
                }
                OrderStatus::Pending | OrderStatus::Processing => {
                    trace!(status = ?status, attempt = attempts, "Order not ready yet");
                }
            }

            attempts += 1;
            if attempts >= FINALIZE_POLL_ATTEMPTS {
                return Err(AcmeError::Finalization(
                    "timed out waiting for the certificate".to_string(),
                ));
            }
            tokio::time::sleep(FINALIZE_POLL_DELAY).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use instant_acme::AuthorizationStatus as Status;

    fn problem(detail: &str) -> instant_acme::Problem {
        instant_acme::Problem {
            r#type: Some("urn:ietf:params:acme:error:unauthorized".to_string()),
            detail: Some(detail.to_string()),
            status: Some(403),
        }
    }

    #[test]
    fn test_convert_state_follows_authorization() {
        assert_eq!(
            convert_state(Status::Pending, None),
            ChallengeState::new(ChallengeStatus::Pending)
        );
        assert_eq!(
            convert_state(Status::Valid, None),
            ChallengeState::new(ChallengeStatus::Valid)
        );
        assert_eq!(
            convert_state(Status::Revoked, None).status,
            ChallengeStatus::Invalid
        );
        assert_eq!(
            convert_state(Status::Expired, None).status,
            ChallengeStatus::Invalid
        );
    }

    #[test]
    fn test_convert_state_keeps_problem() {
        let problem = problem("Invalid response from http://example.com");
        let state = convert_state(Status::Invalid, Some(&problem));

        assert_eq!(state.status, ChallengeStatus::Invalid);
        let error = state.error.unwrap();
        assert_eq!(
            error.error_type.as_deref(),
            Some("urn:ietf:params:acme:error:unauthorized")
        );
        assert_eq!(
            error.detail.as_deref(),
            Some("Invalid response from http://example.com")
        );
    }
}
