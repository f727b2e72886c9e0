//! Event-driven fast path.
//!
//! Every message on the orchestrator subscription is handled on its own:
//! nothing is remembered between events, and a bad event never ends the
//! loop. Only the subscription itself failing or closing does.

use std::sync::Arc;

use futures_util::stream::StreamExt;
use log::{debug, info, warn};

use crate::error::SyncError;
use crate::orchestrator::Orchestrator;
use crate::publisher::Publisher;
use crate::types::{ChangeEvent, EventEnvelope, WorkloadState};

/// What handling one event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Not a container event.
    Dropped,
    /// Envelope or payload could not be decoded.
    Malformed,
    /// Container belongs to another host.
    OtherHost,
    Registered(usize),
    Deregistered(usize),
    /// Local container in a state we do not act on, or lookup failed.
    NoAction,
}

pub struct EventReactor {
    orchestrator: Arc<dyn Orchestrator>,
    publisher: Arc<Publisher>,
    local_host_id: String,
}

impl EventReactor {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        publisher: Arc<Publisher>,
        local_host_id: String,
    ) -> Self {
        Self {
            orchestrator,
            publisher,
            local_host_id,
        }
    }

    /// Consume the subscription until it fails. Never returns `Ok`.
    pub async fn run(&self) -> Result<(), SyncError> {
        let mut stream = self
            .orchestrator
            .subscribe()
            .await
            .map_err(SyncError::Subscribe)?;
        info!("Listening for container events on host {}", self.local_host_id);

        while let Some(message) = stream.next().await {
            let raw = message.map_err(SyncError::EventStream)?;
            match self.handle(&raw).await {
                Reaction::Registered(n) | Reaction::Deregistered(n) => {
                    debug!("Event applied to {} service(s)", n)
                }
                other => debug!("Event handled: {:?}", other),
            }
        }
        Err(SyncError::StreamClosed)
    }

    pub async fn handle(&self, raw: &[u8]) -> Reaction {
        let envelope: EventEnvelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Failed to decode event envelope: {}", e);
                return Reaction::Malformed;
            }
        };
        let resource_id = envelope.resource_id.clone();

        let workload = match ChangeEvent::from_envelope(envelope) {
            Ok(ChangeEvent::Container(workload)) => workload,
            Ok(ChangeEvent::Unrecognized {
                name,
                resource_type,
            }) => {
                debug!("Dropping {} event for {:?}", name, resource_type);
                return Reaction::Dropped;
            }
            Err(e) => {
                warn!("Failed to decode container {}: {}", resource_id, e);
                return Reaction::Malformed;
            }
        };

        if !workload.is_on_host(&self.local_host_id) {
            debug!(
                "Ignoring {} ({}) on host {}",
                workload.name, workload.id, workload.host_id
            );
            return Reaction::OtherHost;
        }

        match workload.state {
            WorkloadState::Running => Reaction::Registered(self.publisher.publish(&workload).await),
            WorkloadState::Stopped => {
                let live = match self.publisher.registry().list_services().await {
                    Ok(live) => live,
                    Err(e) => {
                        warn!(
                            "Could not look up services of stopped container {}: {}",
                            workload.id, e
                        );
                        return Reaction::NoAction;
                    }
                };
                info!("Container stopped: {} ({})", workload.name, workload.id);
                Reaction::Deregistered(self.publisher.retract(&workload, &live).await)
            }
            WorkloadState::Other(_) => Reaction::NoAction,
        }
    }
}
