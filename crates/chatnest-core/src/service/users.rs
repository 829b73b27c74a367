use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Result, ServiceError};
use crate::store::{DataStore, Profile};

/// Read-only access to user profiles.
pub struct UserDirectory {
    store: Arc<dyn DataStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub async fn list(&self) -> Result<Vec<Profile>> {
        Ok(self.store.list_profiles().await?)
    }

    pub async fn get(&self, id: Uuid) -> Result<Profile> {
        self.store
            .find_profile(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()))
    }
}
