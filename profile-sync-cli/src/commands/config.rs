//! `profile-sync config`: print the effective configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use profile_sync_core::config;

/// Arguments for `profile-sync config`.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Read this file instead of `~/.profile-sync/config.yaml`.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ConfigArgs {
    pub fn run(self) -> Result<()> {
        let (source, config) = match self.file {
            Some(path) => {
                let config = config::load_file(&path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                (path, config)
            }
            None => {
                let home: PathBuf =
                    dirs::home_dir().context("could not determine home directory")?;
                let config = config::load_at(&home).context("failed to load configuration")?;
                (config::config_path_at(&home), config)
            }
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&config).context("failed to serialize config JSON")?
            );
            return Ok(());
        }

        let origin = if source.exists() { "file" } else { "defaults" };
        println!("# {} ({origin})", source.display());
        print!(
            "{}",
            serde_yaml::to_string(&config).context("failed to serialize config YAML")?
        );
        Ok(())
    }
}
