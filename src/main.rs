//! Herder agent entry point.
//!
//! One agent runs per host. It keeps the local Consul agent in line with
//! the containers the orchestrator has scheduled on that host.

use std::sync::Arc;

use log::info;

mod config;
mod error;
mod identity;
mod labels;
mod orchestrator;
mod publisher;
mod reactor;
mod reconciler;
mod registry;
mod supervisor;
#[cfg(test)]
mod testing;
mod types;

use config::Config;
use orchestrator::rancher::LocalHost;
use orchestrator::RancherClient;
use registry::ConsulRegistry;
use supervisor::SyncSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting herder with config: {:?}", redacted(&cfg));

    // Orchestrator
    let rancher = RancherClient::new(
        &cfg.cattle_url,
        cfg.cattle_access_key.clone(),
        cfg.cattle_secret_key.clone(),
    )?;
    info!("Client connection established to {}", cfg.cattle_url);

    let host = match (&cfg.host_id, &cfg.agent_ip) {
        (Some(host_id), Some(agent_ip)) => LocalHost {
            host_id: host_id.clone(),
            agent_ip: agent_ip.clone(),
        },
        _ => {
            let discovered = rancher.resolve_local_host(&cfg.metadata_url).await?;
            LocalHost {
                host_id: cfg.host_id.clone().unwrap_or(discovered.host_id),
                agent_ip: cfg.agent_ip.clone().unwrap_or(discovered.agent_ip),
            }
        }
    };
    info!(
        "Monitoring events on host {} with host id {}",
        host.agent_ip, host.host_id
    );

    // Registry
    let consul_address = cfg.consul_address_for(&host.agent_ip);
    let consul = ConsulRegistry::new(
        &consul_address,
        cfg.consul_datacenter.clone(),
        cfg.consul_token.clone(),
    )?;
    info!("Established consul connection to {}", consul_address);

    let settings = SyncSettings {
        local_host_id: host.host_id,
        reconcile_interval: cfg.reconcile_interval(),
        policy: cfg.policy(),
    };
    supervisor::run(Arc::new(rancher), Arc::new(consul), settings).await
}

fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    if cfg.cattle_secret_key.is_some() {
        cfg.cattle_secret_key = Some("***".into());
    }
    if cfg.consul_token.is_some() {
        cfg.consul_token = Some("***".into());
    }
    cfg
}
