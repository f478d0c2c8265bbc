//! Configuration validator: load a DQM configuration file, validate it, and
//! print the sanitized result. Exits non-zero on any validation failure so
//! CI can gate on broken configuration.

use anyhow::{Context, Result};

use dqm_core::config::ConfigManager;

fn main() -> Result<()> {
    dqm_core::logging::init_structured_logging();

    let manager = match std::env::args().nth(1) {
        Some(path) => ConfigManager::load_from_file(&path)
            .with_context(|| format!("failed to load configuration from {path}"))?,
        None => ConfigManager::load().context("failed to load configuration")?,
    };

    println!(
        "Configuration OK: environment={}, databases={}",
        manager.environment(),
        manager.config().databases.len()
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&manager.debug_config())
            .context("failed to render configuration")?
    );
    Ok(())
}
