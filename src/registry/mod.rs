use std::collections::BTreeMap;

use crate::types::Registration;
use async_trait::async_trait;
use thiserror::Error;

pub mod consul;
pub use consul::ConsulRegistry;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Registered ids keyed by their lower-cased form. Values are the ids exactly
/// as the registry stores them, which is what `deregister` must be given.
pub type LiveServices = BTreeMap<String, String>;

#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Every service currently registered.
    async fn list_services(&self) -> Result<LiveServices, RegistryError>;

    /// Create or overwrite the entry with `registration.id`.
    async fn register(&self, registration: &Registration) -> Result<(), RegistryError>;

    /// Remove an entry by its registry id, case preserved. Removing an
    /// unknown id succeeds.
    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError>;
}
