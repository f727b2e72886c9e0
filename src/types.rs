//! Data structures used throughout the herder agent.
//!
//! Workloads and change events are deserialised from the orchestrator's
//! JSON with [`serde`](https://serde.rs/).  A [`Registration`] is the
//! fully resolved entry handed to the registry; it is derived per
//! observation and never stored by the agent.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::identity::ServiceKey;

/// Orchestrator-side lifecycle state of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadState {
    Running,
    Stopped,
    /// Any transitional or terminal state we do not act on directly
    /// (`starting`, `stopping`, `removed`, ...).
    Other(String),
}

impl From<String> for WorkloadState {
    fn from(state: String) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "running" => WorkloadState::Running,
            "stopped" => WorkloadState::Stopped,
            _ => WorkloadState::Other(state),
        }
    }
}

impl Default for WorkloadState {
    fn default() -> Self {
        WorkloadState::Other(String::new())
    }
}

/// One observation of a container as reported by the orchestrator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadDescriptor {
    #[serde(default, deserialize_with = "nullable")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub host_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub primary_ip_address: String,
    #[serde(default, deserialize_with = "nullable_state")]
    pub state: WorkloadState,
    #[serde(default, deserialize_with = "nullable")]
    pub labels: HashMap<String, String>,
}

impl WorkloadDescriptor {
    pub fn is_on_host(&self, host_id: &str) -> bool {
        self.host_id.eq_ignore_ascii_case(host_id)
    }
}

/// A container port exposed by a workload, as found in the ports label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortBinding {
    pub container_port: u16,
    #[serde(default = "default_protocol", deserialize_with = "nullable_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "tcp".into()
}

/// Raw message pushed over the orchestrator's change subscription.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub resource_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub resource_id: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ResourcePayload {
    resource: WorkloadDescriptor,
}

/// A decoded change event.
///
/// Only container changes carry a workload; every other resource kind is
/// kept as [`ChangeEvent::Unrecognized`] so callers can drop it without
/// failing the stream.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Container(WorkloadDescriptor),
    Unrecognized { name: String, resource_type: String },
}

impl ChangeEvent {
    /// Decode the payload of an envelope according to its resource type.
    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, serde_json::Error> {
        if envelope.resource_type.eq_ignore_ascii_case("container") {
            let payload: ResourcePayload = serde_json::from_value(envelope.data)?;
            Ok(ChangeEvent::Container(payload.resource))
        } else {
            Ok(ChangeEvent::Unrecognized {
                name: envelope.name,
                resource_type: envelope.resource_type,
            })
        }
    }
}

/// Health check attached to a registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthCheck {
    Http { url: String, interval: Duration },
    Tcp { address: String, interval: Duration },
}

/// A single registry entry, one per (workload, port, protocol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: ServiceKey,
    pub name: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check: Option<HealthCheck>,
}

/// Treat an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn nullable_state<'de, D>(deserializer: D) -> Result<WorkloadState, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .map(WorkloadState::from)
        .unwrap_or_default())
}

fn nullable_protocol<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?
        .filter(|p| !p.is_empty())
        .unwrap_or_else(default_protocol))
}
