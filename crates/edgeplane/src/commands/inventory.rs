//! `edgeplane inventory`: device table with sync state.

use serde::Serialize;
use tabled::Tabled;

use edgeplane_config::Config;
use edgeplane_core::{Device, ItemStatus, SyncStatus};

use crate::cli::{GlobalOpts, InventoryArgs};
use crate::error::CliError;
use crate::output;

use super::load_inventory;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceSummary {
    id: String,
    name: String,
    org: String,
    machine_id: String,
    approved: bool,
    running: bool,
    agent: String,
    sync: SyncStatus,
    trials: u32,
    /// Routes and DHCP entries with an outstanding job.
    pending: usize,
}

impl From<&Device> for DeviceSummary {
    fn from(d: &Device) -> Self {
        let pending = d
            .static_routes
            .iter()
            .map(|r| r.status)
            .chain(d.dhcp.iter().map(|s| s.status))
            .filter(|s| ItemStatus::is_pending(*s))
            .count();
        Self {
            id: d.id.to_string(),
            name: d.label().to_owned(),
            org: d.org.to_string(),
            machine_id: d.machine_id.to_string(),
            approved: d.is_approved,
            running: d.is_running,
            agent: d.versions.agent.clone(),
            sync: d.sync.state,
            trials: d.sync.trials,
            pending,
        }
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Machine")]
    machine_id: String,
    #[tabled(rename = "Approved")]
    approved: String,
    #[tabled(rename = "Running")]
    running: String,
    #[tabled(rename = "Agent")]
    agent: String,
    #[tabled(rename = "Sync")]
    sync: String,
    #[tabled(rename = "Trials")]
    trials: u32,
    #[tabled(rename = "Pending")]
    pending: usize,
}

pub fn handle(args: &InventoryArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let path = args.file.clone().unwrap_or_else(|| config.inventory_path());
    let inventory = load_inventory(&path)?;
    let summaries: Vec<DeviceSummary> = inventory.devices.iter().map(DeviceSummary::from).collect();

    let color = output::should_color(global.color);
    let rendered = output::render_list(
        global.output,
        &summaries,
        |s| DeviceRow {
            name: s.name.clone(),
            machine_id: s.machine_id.clone(),
            approved: output::paint_check(s.approved, color),
            running: output::paint_check(s.running, color),
            agent: if s.agent.is_empty() { "-".into() } else { s.agent.clone() },
            sync: output::paint_sync(s.sync, color),
            trials: s.trials,
            pending: s.pending,
        },
        |s| s.id.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
