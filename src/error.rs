use thiserror::Error;

use crate::orchestrator::OrchestratorError;
use crate::registry::RegistryError;

/// Terminal outcome of one of the long-running sync units.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("could not subscribe to orchestrator events: {0}")]
    Subscribe(#[source] OrchestratorError),
    #[error("orchestrator event stream failed: {0}")]
    EventStream(#[source] OrchestratorError),
    #[error("orchestrator event stream closed")]
    StreamClosed,
    #[error("could not list workloads: {0}")]
    ListWorkloads(#[source] OrchestratorError),
    #[error("could not list registry services: {0}")]
    ListServices(#[source] RegistryError),
}
