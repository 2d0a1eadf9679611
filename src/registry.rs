use std::sync::Arc;

use tracing::info;

use crate::error::FanoutError;
use crate::storage::Storage;
use crate::types::{Endpoint, EndpointId, EndpointPatch, NewEndpoint};

/// CRUD over the configured destination endpoints.
///
/// The registry owns the single-primary invariant: creating or updating an
/// endpoint with `is_primary = true` clears the flag on every other
/// endpoint, atomically within the storage backend.
#[derive(Clone)]
pub struct EndpointRegistry {
    storage: Arc<dyn Storage>,
}

impl EndpointRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// All endpoints, primary first, then insertion order.
    pub async fn list(&self) -> Result<Vec<Endpoint>, FanoutError> {
        Ok(self.storage.list_endpoints().await?)
    }

    pub async fn create(&self, new: NewEndpoint) -> Result<Endpoint, FanoutError> {
        if new.url.trim().is_empty() {
            return Err(FanoutError::Validation("url is required".to_string()));
        }
        let endpoint = self.storage.insert_endpoint(new).await?;
        info!(
            endpoint = %endpoint.id,
            url = %endpoint.url,
            is_primary = endpoint.is_primary,
            "endpoint created"
        );
        Ok(endpoint)
    }

    /// Apply only the provided fields; absent fields keep their prior value.
    pub async fn update(
        &self,
        id: EndpointId,
        patch: EndpointPatch,
    ) -> Result<Endpoint, FanoutError> {
        if let Some(url) = &patch.url {
            if url.trim().is_empty() {
                return Err(FanoutError::Validation("url must not be empty".to_string()));
            }
        }
        match self.storage.update_endpoint(id, patch).await? {
            Some(endpoint) => {
                info!(endpoint = %endpoint.id, "endpoint updated");
                Ok(endpoint)
            }
            None => Err(FanoutError::endpoint_not_found(id)),
        }
    }

    /// Remove an endpoint. Log entries referencing its URL are untouched.
    pub async fn delete(&self, id: EndpointId) -> Result<(), FanoutError> {
        if self.storage.delete_endpoint(id).await? {
            info!(endpoint = %id, "endpoint deleted");
            Ok(())
        } else {
            Err(FanoutError::endpoint_not_found(id))
        }
    }

    pub async fn get(&self, id: EndpointId) -> Result<Option<Endpoint>, FanoutError> {
        Ok(self.storage.get_endpoint(id).await?)
    }

    /// The set live inbound traffic fans out to.
    pub async fn active_endpoints(&self) -> Result<Vec<Endpoint>, FanoutError> {
        Ok(self.storage.active_endpoints().await?)
    }
}
