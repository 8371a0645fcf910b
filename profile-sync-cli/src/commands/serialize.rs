//! `profile-sync serialize`: encode an event into its wire form.

use anyhow::{Context, Result};
use clap::Args;

use profile_sync_core::{validate_event, EventSerializer};

use super::read_json_arg;
use crate::ChecksumArg;

/// Arguments for `profile-sync serialize`.
#[derive(Args, Debug)]
pub struct SerializeArgs {
    /// Event JSON, or `@path` to read it from a file.
    pub event: String,

    /// Integrity checksum to attach.
    #[arg(long, default_value_t = ChecksumArg::default())]
    pub checksum: ChecksumArg,
}

impl SerializeArgs {
    pub fn run(self) -> Result<()> {
        let raw = read_json_arg(&self.event)?;
        let event = validate_event(&raw)
            .into_result()
            .context("event failed validation")?;
        let wire = EventSerializer::new(self.checksum.into())
            .serialize(&event)
            .context("failed to serialize event")?;
        println!(
            "{}",
            serde_json::to_string_pretty(&wire).context("failed to encode wire event")?
        );
        Ok(())
    }
}
