//! Pending challenge responses keyed by token

use tracing::{debug, warn};

use super::{FanoutStore, StoreEntry};
use crate::error::StorageError;
use crate::model::ChallengeRecord;

/// Challenge responses shared with every instance that may be asked to
/// answer a validation request
#[derive(Clone)]
pub struct ChallengeStore {
    store: FanoutStore,
}

impl ChallengeStore {
    pub fn new(store: FanoutStore) -> Self {
        Self { store }
    }

    pub async fn save(&self, token: &str, response: &str) -> Result<(), StorageError> {
        self.store
            .save(token, &StoreEntry::new(response.as_bytes()))
            .await
    }

    pub async fn save_record(&self, record: &ChallengeRecord) -> Result<(), StorageError> {
        self.save(&record.token, &record.response).await?;
        debug!(
            domain = %record.domain,
            kind = %record.kind,
            token = %record.token,
            "Stored challenge response"
        );
        Ok(())
    }

    pub async fn load(&self, token: &str) -> Option<String> {
        let data = self.store.load(token).await?;
        match String::from_utf8(data) {
            Ok(response) => Some(response),
            Err(_) => {
                warn!(token = %token, "Stored challenge response is not UTF-8, ignoring");
                None
            }
        }
    }

    pub async fn delete(&self, token: &str) {
        self.store.delete(token).await;
    }
}
