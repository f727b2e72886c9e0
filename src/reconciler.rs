//! Periodic full reconciliation.
//!
//! Each pass recomputes the desired entries from a fresh workload listing
//! and compares them against a fresh registry listing. Nothing carries over
//! between passes, so a lost event is repaired at the latest one period
//! later, and every local entry outside the desired set is removed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::error::SyncError;
use crate::identity::{host_prefix, prefix_of, ServiceKey};
use crate::orchestrator::Orchestrator;
use crate::publisher::{self, Publisher};
use crate::registry::LiveServices;
use crate::types::{WorkloadDescriptor, WorkloadState};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(300);

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub desired: usize,
    pub missing: usize,
    pub registered: usize,
    pub deregistered: usize,
}

pub struct Reconciler {
    orchestrator: Arc<dyn Orchestrator>,
    publisher: Arc<Publisher>,
    local_host_id: String,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        publisher: Arc<Publisher>,
        local_host_id: String,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            publisher,
            local_host_id,
            interval,
        }
    }

    /// Reconcile forever, starting immediately. Returns only when a listing
    /// call fails.
    pub async fn run(&self) -> Result<(), SyncError> {
        info!(
            "Reconciling every {}s for host {}",
            self.interval.as_secs(),
            self.local_host_id
        );
        loop {
            match self.reconcile_once().await {
                Ok(report) => info!(
                    "Reconciliation pass finished: {} desired, {} missing, {} registered, {} deregistered",
                    report.desired, report.missing, report.registered, report.deregistered
                ),
                Err(e) => {
                    error!("Reconciliation failed: {}", e);
                    return Err(e);
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    pub async fn reconcile_once(&self) -> Result<PassReport, SyncError> {
        // Registry first: anything it already holds was registered before
        // the workload listing below was taken.
        let live = self
            .publisher
            .registry()
            .list_services()
            .await
            .map_err(SyncError::ListServices)?;
        let listing = self
            .orchestrator
            .list_workloads()
            .await
            .map_err(SyncError::ListWorkloads)?;

        // Later entries win if the listing reports an id twice.
        let workloads: HashMap<&str, &WorkloadDescriptor> =
            listing.iter().map(|w| (w.id.as_str(), w)).collect();
        let local: Vec<&WorkloadDescriptor> = workloads
            .values()
            .copied()
            .filter(|w| w.is_on_host(&self.local_host_id))
            .collect();

        let desired = self.desired_set(&local);
        debug!("Desired services: {:?}", desired.keys().collect::<Vec<_>>());
        debug!("Live services: {:?}", live.values().collect::<Vec<_>>());

        let mut report = PassReport {
            desired: desired.len(),
            ..Default::default()
        };

        let mut missing_owners = BTreeSet::new();
        for (key, owner) in &desired {
            if !live.contains_key(key.as_str()) {
                report.missing += 1;
                missing_owners.insert(owner.as_str());
            }
        }
        for id in missing_owners {
            report.registered += self.repair_missing(id).await;
        }

        let stopped: Vec<&WorkloadDescriptor> = local
            .iter()
            .copied()
            .filter(|w| w.state == WorkloadState::Stopped)
            .collect();
        for workload in &stopped {
            let removed = self.publisher.retract(workload, &live).await;
            if removed > 0 {
                info!(
                    "Reconciled stopped container {} ({})",
                    workload.name, workload.id
                );
            }
            report.deregistered += removed;
        }

        for id in self.stale(&live, &desired, &stopped) {
            info!("Reconciling stale service {}", id);
            if self.publisher.remove(id).await {
                report.deregistered += 1;
            }
        }

        Ok(report)
    }

    /// Keys that should exist for local running workloads, mapped to the id
    /// of the owning workload.
    fn desired_set(&self, local: &[&WorkloadDescriptor]) -> BTreeMap<ServiceKey, String> {
        let mut desired = BTreeMap::new();
        for workload in local.iter().filter(|w| w.state == WorkloadState::Running) {
            match publisher::plan(workload, self.publisher.policy()) {
                Ok(registrations) => {
                    for registration in registrations {
                        desired.insert(registration.id, workload.id.clone());
                    }
                }
                Err(e) => warn!(
                    "Skipping workload {} ({}) in reconciliation: {}",
                    workload.name, workload.id, e
                ),
            }
        }
        desired
    }

    /// Re-fetch a workload whose entries are missing and publish it.
    async fn repair_missing(&self, id: &str) -> usize {
        let workload = match self.orchestrator.get_workload(id).await {
            Ok(Some(workload)) => workload,
            Ok(None) => {
                debug!("Container {} no longer exists", id);
                return 0;
            }
            Err(e) => {
                warn!("Failed to fetch container {}: {}", id, e);
                return 0;
            }
        };
        if workload.state != WorkloadState::Running || !workload.is_on_host(&self.local_host_id) {
            debug!("Container {} is no longer running here", id);
            return 0;
        }
        info!("Reconciling {} adding to registry", workload.name);
        self.publisher.publish(&workload).await
    }

    /// Registry ids of local entries that are not desired: their workload
    /// vanished, was removed, stopped being eligible or no longer exposes
    /// that port. Entries of stopped workloads are left to `retract`, and
    /// ids that are not service keys are never touched.
    fn stale<'a>(
        &self,
        live: &'a LiveServices,
        desired: &BTreeMap<ServiceKey, String>,
        stopped: &[&WorkloadDescriptor],
    ) -> Vec<&'a str> {
        let host = host_prefix(&self.local_host_id);
        let stopped: Vec<String> = stopped.iter().map(|w| prefix_of(w)).collect();
        live.iter()
            .filter(|(key, _)| key.starts_with(&host))
            .filter(|(key, _)| !stopped.iter().any(|p| key.starts_with(p.as_str())))
            .filter_map(|(key, id)| {
                let key = ServiceKey::parse(key)?;
                (!desired.contains_key(&key)).then_some(id.as_str())
            })
            .collect()
    }
}
