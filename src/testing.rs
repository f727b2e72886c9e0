//! In-memory adapters for exercising the sync engine without a cluster.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Mutex;

use crate::labels;
use crate::orchestrator::{EventStream, Orchestrator, OrchestratorError};
use crate::registry::{LiveServices, RegistryError, ServiceRegistry};
use crate::types::{Registration, WorkloadDescriptor};

/// A running-or-not workload on `host` exposing 8080/tcp and explicitly
/// enabled.
pub fn workload(id: &str, host: &str, name: &str, state: &str) -> WorkloadDescriptor {
    WorkloadDescriptor {
        id: id.into(),
        host_id: host.into(),
        name: name.into(),
        primary_ip_address: "10.0.0.1".into(),
        state: state.to_string().into(),
        labels: [
            (
                labels::PORTS.to_string(),
                r#"[{"containerPort":8080,"protocol":"tcp"}]"#.to_string(),
            ),
            (labels::ENABLE.to_string(), "true".to_string()),
        ]
        .into_iter()
        .collect(),
    }
}

/// Envelope bytes for a container change event.
pub fn container_event(w: &WorkloadDescriptor) -> Vec<u8> {
    let state = match &w.state {
        crate::types::WorkloadState::Running => "running".to_string(),
        crate::types::WorkloadState::Stopped => "stopped".to_string(),
        crate::types::WorkloadState::Other(s) => s.clone(),
    };
    serde_json::to_vec(&serde_json::json!({
        "name": "resource.change",
        "resourceType": "container",
        "resourceId": w.id,
        "data": {
            "resource": {
                "id": w.id,
                "hostId": w.host_id,
                "name": w.name,
                "primaryIpAddress": w.primary_ip_address,
                "state": state,
                "labels": w.labels,
            }
        }
    }))
    .unwrap()
}

fn failure(what: &str) -> OrchestratorError {
    OrchestratorError::Status {
        url: what.to_string(),
        status: reqwest::StatusCode::BAD_GATEWAY,
        body: String::new(),
    }
}

#[derive(Default)]
struct RegistryState {
    services: BTreeSet<String>,
    register_calls: usize,
    deregistered: Vec<String>,
    failing: BTreeSet<String>,
    fail_list: bool,
}

#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub async fn seed(&self, ids: &[&str]) {
        let mut state = self.state.lock().await;
        state.services.extend(ids.iter().map(|id| id.to_string()));
    }

    pub async fn ids(&self) -> Vec<String> {
        self.state.lock().await.services.iter().cloned().collect()
    }

    pub async fn register_calls(&self) -> usize {
        self.state.lock().await.register_calls
    }

    pub async fn deregistered(&self) -> Vec<String> {
        self.state.lock().await.deregistered.clone()
    }

    pub async fn fail_register(&self, id: &str) {
        self.state.lock().await.failing.insert(id.to_string());
    }

    pub async fn fail_list(&self) {
        self.state.lock().await.fail_list = true;
    }
}

#[async_trait]
impl ServiceRegistry for MemoryRegistry {
    async fn list_services(&self) -> Result<LiveServices, RegistryError> {
        let state = self.state.lock().await;
        if state.fail_list {
            return Err(RegistryError::Status {
                url: "memory".into(),
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new(),
            });
        }
        Ok(state
            .services
            .iter()
            .map(|id| (id.to_lowercase(), id.clone()))
            .collect())
    }

    async fn register(&self, registration: &Registration) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        state.register_calls += 1;
        if state.failing.contains(registration.id.as_str()) {
            return Err(RegistryError::Status {
                url: "memory".into(),
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new(),
            });
        }
        state.services.insert(registration.id.to_string());
        Ok(())
    }

    /// Ids are matched exactly, as Consul does.
    async fn deregister(&self, service_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.lock().await;
        state.services.remove(service_id);
        state.deregistered.push(service_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct OrchestratorState {
    workloads: Vec<WorkloadDescriptor>,
    events: Vec<Vec<u8>>,
    hold_open: bool,
    fail_stream: bool,
    fail_list: bool,
}

#[derive(Default)]
pub struct MemoryOrchestrator {
    state: Mutex<OrchestratorState>,
}

impl MemoryOrchestrator {
    pub async fn set_workloads(&self, workloads: Vec<WorkloadDescriptor>) {
        self.state.lock().await.workloads = workloads;
    }

    pub async fn push_event(&self, raw: Vec<u8>) {
        self.state.lock().await.events.push(raw);
    }

    /// Keep the subscription open after the queued events instead of
    /// ending it.
    pub async fn hold_open(&self) {
        self.state.lock().await.hold_open = true;
    }

    /// End the subscription with a read error after the queued events.
    pub async fn fail_stream(&self) {
        self.state.lock().await.fail_stream = true;
    }

    pub async fn fail_list(&self) {
        self.state.lock().await.fail_list = true;
    }
}

#[async_trait]
impl Orchestrator for MemoryOrchestrator {
    async fn list_workloads(&self) -> Result<Vec<WorkloadDescriptor>, OrchestratorError> {
        let state = self.state.lock().await;
        if state.fail_list {
            return Err(failure("list"));
        }
        Ok(state.workloads.clone())
    }

    async fn get_workload(
        &self,
        id: &str,
    ) -> Result<Option<WorkloadDescriptor>, OrchestratorError> {
        let state = self.state.lock().await;
        Ok(state.workloads.iter().find(|w| w.id == id).cloned())
    }

    async fn subscribe(&self) -> Result<EventStream, OrchestratorError> {
        let state = self.state.lock().await;
        let queued = stream::iter(state.events.clone().into_iter().map(Ok));
        if state.hold_open {
            Ok(queued.chain(stream::pending()).boxed())
        } else if state.fail_stream {
            Ok(queued
                .chain(stream::once(async { Err(failure("read")) }))
                .boxed())
        } else {
            Ok(queued.boxed())
        }
    }
}
