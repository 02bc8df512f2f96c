//! `edgeplane serve`: agent listener plus controller until Ctrl-C.
//!
//! The inventory file is loaded once at start, rewritten shortly after
//! each burst of store writes, and saved a final time on shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use edgeplane_api::{AgentListener, AgentTransport, ConnectionRegistry};
use edgeplane_config::Config;
use edgeplane_core::{Controller, DataStore, JobEvent, StoreAdmission, TrustedOrg};

use crate::cli::ServeArgs;
use crate::error::CliError;

use super::{load_inventory, save_inventory};

/// Quiet period after a store write before the inventory is rewritten.
const SAVE_DEBOUNCE: Duration = Duration::from_secs(2);

pub async fn handle(args: ServeArgs, mut config: Config) -> Result<(), CliError> {
    if let Some(listen) = args.listen {
        config.server.listen = listen.to_string();
    }
    let addr = config.listen_addr()?;
    let inventory_path = args.inventory.unwrap_or_else(|| config.inventory_path());

    let inventory = load_inventory(&inventory_path)?;
    info!(
        path = %inventory_path.display(),
        organizations = inventory.organizations.len(),
        devices = inventory.devices.len(),
        tunnels = inventory.tunnels.len(),
        "inventory loaded"
    );
    let store = Arc::new(DataStore::from_inventory(inventory));

    let registry = Arc::new(ConnectionRegistry::new());
    let listener = AgentListener::bind(
        addr,
        Arc::clone(&registry),
        Arc::new(StoreAdmission::new(Arc::clone(&store))),
    )
    .await
    .map_err(|source| CliError::BindFailed {
        addr: addr.to_string(),
        source,
    })?;

    let controller = Controller::new(
        Arc::clone(&store),
        registry as Arc<dyn AgentTransport>,
        Arc::new(TrustedOrg),
        config.to_control_plane_config(),
    );
    let job_events = controller.job_events();
    controller.start().await?;

    let cancel = CancellationToken::new();
    let events_task = tokio::spawn(log_job_events(job_events, cancel.child_token()));
    let listener_task = tokio::spawn(listener.serve(cancel.child_token()));
    let persist_task = tokio::spawn(persist_inventory(
        Arc::clone(&store),
        inventory_path.clone(),
        cancel.child_token(),
    ));

    info!(%addr, "control plane running");
    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    cancel.cancel();
    let _ = listener_task.await;
    let _ = persist_task.await;
    let _ = events_task.await;
    controller.shutdown().await;

    save_inventory(&inventory_path, &store.to_inventory())?;
    info!(path = %inventory_path.display(), "inventory saved");
    Ok(())
}

/// Rewrite the inventory after store writes settle.
async fn persist_inventory(store: Arc<DataStore>, path: PathBuf, cancel: CancellationToken) {
    let mut revisions = store.subscribe_revision();
    let mut saved = *revisions.borrow_and_update();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(SAVE_DEBOUNCE) => {}
                }
                let revision = *revisions.borrow_and_update();
                if revision == saved {
                    continue;
                }
                match write_snapshot(&store, &path) {
                    Ok(()) => {
                        saved = revision;
                        debug!(revision, "inventory saved");
                    }
                    Err(e) => warn!(error = %e, path = %path.display(), "inventory save failed"),
                }
            }
        }
    }
}

/// Log each finished job; earlier lifecycle steps only at debug.
async fn log_job_events(mut events: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(JobEvent::Finished { id, machine_id, state }) => {
                    info!(job_id = %id, machine_id = %machine_id, %state, "job finished");
                }
                Ok(event) => debug!(?event, "job event"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "job event log lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
}

fn write_snapshot(store: &DataStore, path: &Path) -> Result<(), CliError> {
    save_inventory(path, &store.to_inventory())
}
