use crate::types::WorkloadDescriptor;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub mod rancher;
pub use rancher::RancherClient;

/// Raw change-event messages. The subscription is closed when the stream
/// is dropped.
pub type EventStream = BoxStream<'static, Result<Vec<u8>, OrchestratorError>>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("orchestrator returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("event subscription failed: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
    #[error("invalid orchestrator url: {0}")]
    Url(String),
    #[error("invalid credentials: {0}")]
    Credentials(String),
    #[error("host with uuid {0} not found")]
    UnknownHost(String),
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Every workload the orchestrator knows about, in any state.
    async fn list_workloads(&self) -> Result<Vec<WorkloadDescriptor>, OrchestratorError>;

    /// Fetch one workload. `Ok(None)` when it no longer exists.
    async fn get_workload(&self, id: &str)
        -> Result<Option<WorkloadDescriptor>, OrchestratorError>;

    /// Open the change-event subscription.
    async fn subscribe(&self) -> Result<EventStream, OrchestratorError>;
}
