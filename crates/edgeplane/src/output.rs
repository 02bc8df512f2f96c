//! Output formatting: table, JSON, plain.
//!
//! Table uses `tabled`, JSON goes through serde, plain emits one
//! identifier per line.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use edgeplane_core::SyncStatus;

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Sync state label, colored by health when `color` is set.
pub fn paint_sync(state: SyncStatus, color: bool) -> String {
    let label = state.to_string();
    if !color {
        return label;
    }
    match state {
        SyncStatus::Synced => label.green().to_string(),
        SyncStatus::Syncing => label.yellow().to_string(),
        SyncStatus::NotSynced => label.red().bold().to_string(),
        SyncStatus::Unknown => label.dimmed().to_string(),
    }
}

pub fn paint_check(ok: bool, color: bool) -> String {
    let mark = if ok { "yes" } else { "no" };
    match (color, ok) {
        (true, true) => mark.green().to_string(),
        (true, false) => mark.dimmed().to_string(),
        (false, _) => mark.to_owned(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable items in the chosen format.
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    Ok(match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            render_table(&rows)
        }
        OutputFormat::Json => serde_json::to_string_pretty(data)?,
        OutputFormat::Plain => data.iter().map(&id_fn).collect::<Vec<_>>().join("\n"),
    })
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}
