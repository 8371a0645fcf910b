//! `profile-sync validate`: run the event validator over raw JSON.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;

use profile_sync_core::validate_event;

use super::read_json_arg;

/// Arguments for `profile-sync validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Event JSON, or `@path` to read it from a file.
    pub event: String,
}

impl ValidateArgs {
    pub fn run(self) -> Result<()> {
        let raw = read_json_arg(&self.event)?;
        let outcome = validate_event(&raw);

        if let (Some(event), true) = (outcome.event.as_ref(), outcome.errors.is_empty()) {
            println!(
                "{} {} event from '{}' at {}",
                "valid".green().bold(),
                event.event_type(),
                event.source(),
                event.timestamp()
            );
            return Ok(());
        }

        println!("{}", "invalid".red().bold());
        for error in &outcome.errors {
            println!("  {}: {}", error.field.bold(), error.message);
        }
        bail!("event failed validation with {} error(s)", outcome.errors.len())
    }
}
