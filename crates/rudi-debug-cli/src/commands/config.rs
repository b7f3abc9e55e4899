//! Config command implementation.

use std::path::Path;

use anyhow::Result;

use crate::config::{Config, PROJECT_FILE};

/// Show the effective configuration.
pub fn show(config: &Config) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Show the path of the project config file.
pub fn path(project_dir: &Path) {
    println!("{}", project_dir.join(PROJECT_FILE).display());
}

/// Write the effective configuration as the project file.
pub fn init(config: &Config, project_dir: &Path) -> Result<()> {
    let path = config.save(project_dir)?;
    println!("Wrote {}", path.display());
    Ok(())
}
