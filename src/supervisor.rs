//! Runs the event reactor and the reconciler side by side.
//!
//! The two units never talk to each other; they only meet in the registry.
//! Whichever finishes first (always with an error) brings the whole agent
//! down, as does an OS shutdown signal.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use log::{error, info};
use tokio::sync::mpsc;

use crate::error::SyncError;
use crate::labels::EligibilityPolicy;
use crate::orchestrator::Orchestrator;
use crate::publisher::Publisher;
use crate::reactor::EventReactor;
use crate::reconciler::Reconciler;
use crate::registry::ServiceRegistry;

/// Plain values the sync units need from the process configuration.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub local_host_id: String,
    pub reconcile_interval: Duration,
    pub policy: EligibilityPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    EventReactor,
    Reconciler,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::EventReactor => f.write_str("event reactor"),
            Unit::Reconciler => f.write_str("reconciler"),
        }
    }
}

/// Run until a shutdown signal (clean exit) or until either unit stops
/// (error).
pub async fn run(
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<dyn ServiceRegistry>,
    settings: SyncSettings,
) -> anyhow::Result<()> {
    run_until(orchestrator, registry, settings, wait_for_shutdown_signal()).await
}

pub async fn run_until<F>(
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<dyn ServiceRegistry>,
    settings: SyncSettings,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let publisher = Arc::new(Publisher::new(registry, settings.policy));
    let reactor = EventReactor::new(
        Arc::clone(&orchestrator),
        Arc::clone(&publisher),
        settings.local_host_id.clone(),
    );
    let reconciler = Reconciler::new(
        orchestrator,
        publisher,
        settings.local_host_id,
        settings.reconcile_interval,
    );

    let (done_tx, mut done_rx) = mpsc::channel::<(Unit, Result<(), SyncError>)>(2);

    let reactor_tx = done_tx.clone();
    let reactor_handle = tokio::spawn(async move {
        let _ = reactor_tx
            .send((Unit::EventReactor, reactor.run().await))
            .await;
    });

    let reconciler_tx = done_tx;
    let reconciler_handle = tokio::spawn(async move {
        let _ = reconciler_tx
            .send((Unit::Reconciler, reconciler.run().await))
            .await;
    });

    let outcome = tokio::select! {
        signal = shutdown => match signal {
            Ok(()) => {
                info!("Received shutdown signal, shutting down...");
                Ok(())
            }
            Err(e) => {
                error!("Unable to listen for shutdown signal: {}", e);
                Err(anyhow!("unable to listen for shutdown signal: {}", e))
            }
        },
        Some((unit, result)) = done_rx.recv() => match result {
            Err(e) => {
                error!("The {} failed: {}", unit, e);
                Err(anyhow::Error::new(e).context(format!("{} failed", unit)))
            }
            Ok(()) => Err(anyhow!("{} exited unexpectedly", unit)),
        },
        else => Err(anyhow!("sync units stopped without reporting")),
    };

    // Dropping the reactor's future closes the event subscription and
    // cancels the reconciler's sleep.
    reactor_handle.abort();
    reconciler_handle.abort();

    info!("Shutdown complete.");
    outcome
}

/// Completes on SIGINT, SIGTERM or SIGQUIT (Ctrl-C elsewhere).
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
