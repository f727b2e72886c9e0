//! Canonical registry identity of a workload port.
//!
//! A key has the shape `hostId:workloadName:workloadId:containerPort:protocol`
//! and is always lower case, since the orchestrator does not keep casing
//! stable while the registry compares ids case-sensitively.

use std::fmt;

use crate::types::{PortBinding, WorkloadDescriptor};

pub const SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey(String);

impl ServiceKey {
    /// Key for one port of a workload, or `None` when a segment contains
    /// the separator and the key could not be read back with [`parse`].
    ///
    /// [`parse`]: ServiceKey::parse
    pub fn of(workload: &WorkloadDescriptor, port: &PortBinding) -> Option<Self> {
        let segments = [
            workload.host_id.as_str(),
            workload.name.as_str(),
            workload.id.as_str(),
            port.protocol.as_str(),
        ];
        if segments.iter().any(|s| s.contains(SEPARATOR)) {
            return None;
        }
        Some(ServiceKey(
            format!(
                "{}{sep}{}{sep}{}{sep}{}{sep}{}",
                workload.host_id,
                workload.name,
                workload.id,
                port.container_port,
                port.protocol,
                sep = SEPARATOR
            )
            .to_lowercase(),
        ))
    }

    /// Wrap an id read back from the registry. Returns `None` if it was
    /// not produced by [`ServiceKey::of`].
    pub fn parse(id: &str) -> Option<Self> {
        let segments: Vec<&str> = id.split(SEPARATOR).collect();
        match segments.as_slice() {
            [_, _, _, port, _] if port.parse::<u16>().is_ok() => {
                Some(ServiceKey(id.to_lowercase()))
            }
            _ => None,
        }
    }

    /// Id of the workload owning this key.
    pub fn workload_id(&self) -> Option<&str> {
        self.0.split(SEPARATOR).nth(2)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix shared by every key of `workload`, regardless of port.
///
/// Ends with the separator so that workload `c1` never matches keys of `c10`.
pub fn prefix_of(workload: &WorkloadDescriptor) -> String {
    format!(
        "{}{sep}{}{sep}{}{sep}",
        workload.host_id,
        workload.name,
        workload.id,
        sep = SEPARATOR
    )
    .to_lowercase()
}

/// Prefix shared by every key owned by agents on `host_id`.
pub fn host_prefix(host_id: &str) -> String {
    format!("{}{}", host_id, SEPARATOR).to_lowercase()
}
