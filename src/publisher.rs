//! Turning a workload into registry entries and back.
//!
//! Both the event reactor and the reconciler go through [`Publisher`], so a
//! workload is published identically whichever path notices it first.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::identity::{prefix_of, ServiceKey, SEPARATOR};
use crate::labels::{self, EligibilityPolicy, LabelError, RegistrationSpec};
use crate::registry::{LiveServices, ServiceRegistry};
use crate::types::{HealthCheck, PortBinding, Registration, WorkloadDescriptor};

/// Registry entries for `workload`, or an empty list when it has no ports,
/// is not eligible, has no address or cannot be keyed.
pub fn plan(
    workload: &WorkloadDescriptor,
    policy: EligibilityPolicy,
) -> Result<Vec<Registration>, LabelError> {
    let spec = match labels::decode(&workload.labels, policy)? {
        Some(spec) if spec.eligible => spec,
        Some(_) => {
            debug!("Workload {} ({}) is not enabled", workload.name, workload.id);
            return Ok(Vec::new());
        }
        None => {
            debug!("Workload {} ({}) exposes no ports", workload.name, workload.id);
            return Ok(Vec::new());
        }
    };

    if workload.primary_ip_address.is_empty() {
        warn!(
            "Skipping workload {} ({}): no primary address",
            workload.name, workload.id
        );
        return Ok(Vec::new());
    }

    let registrations: Option<Vec<Registration>> = spec
        .ports
        .iter()
        .map(|port| registration(workload, &spec, port))
        .collect();
    Ok(registrations.unwrap_or_else(|| {
        warn!(
            "Skipping workload {} ({}): host, name, id or protocol contains '{}'",
            workload.name, workload.id, SEPARATOR
        );
        Vec::new()
    }))
}

fn registration(
    workload: &WorkloadDescriptor,
    spec: &RegistrationSpec,
    port: &PortBinding,
) -> Option<Registration> {
    let address = workload.primary_ip_address.clone();
    let check_port = spec.check_port.unwrap_or(port.container_port);
    let check = if spec.check_tcp {
        Some(HealthCheck::Tcp {
            address: format!("{}:{}", address, check_port),
            interval: spec.check_interval,
        })
    } else {
        spec.check_path.as_ref().map(|path| HealthCheck::Http {
            url: format!(
                "{}://{}:{}/{}",
                spec.check_scheme,
                address,
                check_port,
                path.trim_start_matches('/')
            ),
            interval: spec.check_interval,
        })
    };

    Some(Registration {
        id: ServiceKey::of(workload, port)?,
        name: spec
            .service_name
            .clone()
            .unwrap_or_else(|| workload.name.clone()),
        address,
        port: port.container_port,
        tags: spec.tags.clone(),
        check,
    })
}

pub struct Publisher {
    registry: Arc<dyn ServiceRegistry>,
    policy: EligibilityPolicy,
}

impl Publisher {
    pub fn new(registry: Arc<dyn ServiceRegistry>, policy: EligibilityPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> EligibilityPolicy {
        self.policy
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    /// Register every port of a running workload. Failures are logged and
    /// skipped; returns the number of entries written.
    pub async fn publish(&self, workload: &WorkloadDescriptor) -> usize {
        let registrations = match plan(workload, self.policy) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    "Skipping workload {} ({}): {}",
                    workload.name, workload.id, e
                );
                return 0;
            }
        };

        let mut registered = 0;
        for registration in &registrations {
            match self.registry.register(registration).await {
                Ok(()) => {
                    info!("Registered {} as {}", registration.id, registration.name);
                    registered += 1;
                }
                Err(e) => warn!("Failed to register service {}: {}", registration.id, e),
            }
        }
        registered
    }

    /// Deregister every entry in `live` that belongs to `workload`.
    pub async fn retract(&self, workload: &WorkloadDescriptor, live: &LiveServices) -> usize {
        let prefix = prefix_of(workload);
        let owned: Vec<&String> = live
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(_, id)| id)
            .collect();
        let mut removed = 0;
        for id in owned {
            if self.remove(id).await {
                removed += 1;
            }
        }
        removed
    }

    /// Deregister a single entry by its registry id. Failures are logged.
    pub async fn remove(&self, service_id: &str) -> bool {
        match self.registry.deregister(service_id).await {
            Ok(()) => {
                info!("Service {} deregistered", service_id);
                true
            }
            Err(e) => {
                warn!("Error deregistering {}: {}", service_id, e);
                false
            }
        }
    }
}
