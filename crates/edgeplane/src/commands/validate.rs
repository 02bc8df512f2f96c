//! `edgeplane validate`: run the intent validator offline over a device
//! document.

use std::sync::Arc;

use serde::Serialize;
use tabled::Tabled;

use edgeplane_core::Device;
use edgeplane_core::validate::{
    Rejection, validate_device, validate_dhcp, validate_org_lan_overlap, validate_static_route,
};

use crate::cli::{GlobalOpts, ValidateArgs};
use crate::error::CliError;
use crate::output;

use super::{load_inventory, read_json};

#[derive(Debug, Serialize)]
struct CheckResult {
    check: String,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Tabled)]
struct CheckRow {
    #[tabled(rename = "Check")]
    check: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl CheckResult {
    fn new(check: impl Into<String>, outcome: Result<(), Rejection>) -> Self {
        let reason = outcome.err().map(|r| r.reason().to_owned());
        Self {
            check: check.into(),
            passed: reason.is_none(),
            reason,
        }
    }
}

/// Every check the dispatcher would run for this device's current
/// configuration.
fn run_checks(device: &Device, org_devices: Option<&[Arc<Device>]>) -> Vec<CheckResult> {
    let mut checks = vec![CheckResult::new(
        "interfaces",
        validate_device(device, device.is_running),
    )];
    checks.extend(
        device
            .dhcp
            .iter()
            .map(|dhcp| CheckResult::new(format!("dhcp {}", dhcp.interface), validate_dhcp(device, dhcp))),
    );
    checks.extend(device.static_routes.iter().map(|route| {
        CheckResult::new(
            format!("route {}", route.destination),
            validate_static_route(device, route),
        )
    }));
    if let Some(others) = org_devices {
        checks.push(CheckResult::new(
            "organization LAN overlap",
            validate_org_lan_overlap(device, others),
        ));
    }
    checks
}

pub fn handle(args: &ValidateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let device: Device = read_json(&args.file)?;

    let org_devices = match &args.org_file {
        Some(path) => Some(
            load_inventory(path)?
                .devices
                .into_iter()
                .filter(|d| d.org == device.org)
                .map(Arc::new)
                .collect::<Vec<_>>(),
        ),
        None => None,
    };

    let checks = run_checks(&device, org_devices.as_deref());
    tracing::debug!(device = %device.id, checks = checks.len(), "validated device document");

    let color = output::should_color(global.color);
    let rendered = output::render_list(
        global.output,
        &checks,
        |c| CheckRow {
            check: c.check.clone(),
            result: output::paint_check(c.passed, color),
            reason: c.reason.clone().unwrap_or_default(),
        },
        |c| format!("{}\t{}", c.check, if c.passed { "ok" } else { "failed" }),
    )?;
    output::print_output(&rendered, global.quiet);

    match checks.into_iter().find_map(|c| c.reason) {
        Some(reason) => Err(CliError::Rejected {
            path: args.file.display().to_string(),
            reason,
        }),
        None => Ok(()),
    }
}
