//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod inventory;
pub mod serve;
pub mod validate;

use std::path::Path;

use edgeplane_config::{Config, ConfigError};
use edgeplane_core::Inventory;

use crate::cli::{Cli, Command, CompletionsArgs, GlobalOpts};
use crate::error::CliError;

/// Route a parsed command. `loaded` is only unwrapped by commands that
/// read the config.
pub async fn dispatch(
    cmd: Command,
    loaded: Result<Config, ConfigError>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Serve(args) => serve::handle(args, loaded?).await,
        Command::Inventory(args) => inventory::handle(&args, &loaded?, global),
        Command::Config(args) => config_cmd::handle(&args, loaded, global),
        // Offline checks never need a config file.
        Command::Validate(args) => validate::handle(&args, global),
        Command::Completions(args) => {
            completions(&args);
            Ok(())
        }
    }
}

/// Write shell completions for `edgeplane` to stdout.
pub fn completions(args: &CompletionsArgs) {
    use clap::CommandFactory;

    let mut cmd = Cli::command();
    clap_complete::generate(args.shell, &mut cmd, "edgeplane", &mut std::io::stdout());
}

// ── Shared file helpers ──────────────────────────────────────────────

/// Read and parse a JSON document.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Load an inventory, treating a missing file as empty.
pub(crate) fn load_inventory(path: &Path) -> Result<Inventory, CliError> {
    if !path.exists() {
        return Ok(Inventory::default());
    }
    read_json(path)
}

/// Write an inventory through a temporary file so readers never see a
/// partial document.
pub(crate) fn save_inventory(path: &Path, inventory: &Inventory) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(inventory)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
