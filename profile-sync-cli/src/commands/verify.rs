//! `profile-sync verify`: decode wire events and check their checksums.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use profile_sync_core::{serializer::WireFrame, EventSerializer};

use super::read_arg;
use crate::ChecksumArg;

/// Arguments for `profile-sync verify`.
#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Wire event or batch frame JSON, or `@path` to read it from a file.
    pub frame: String,

    /// Checksum the sender used.
    #[arg(long, default_value_t = ChecksumArg::default())]
    pub checksum: ChecksumArg,
}

#[derive(Tabled)]
struct VerifyRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "type")]
    event_type: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "timestamp")]
    timestamp: String,
    #[tabled(rename = "result")]
    result: String,
}

impl VerifyArgs {
    pub fn run(self) -> Result<()> {
        let text = read_arg(&self.frame)?;
        let frame = WireFrame::decode(&text).context("input is not a wire event or batch frame")?;
        let serializer = EventSerializer::new(self.checksum.into());

        let mut rows = Vec::new();
        let mut failures = 0usize;
        for (index, wire) in frame.into_events().into_iter().enumerate() {
            let result = match serializer.deserialize(&wire) {
                Ok(_) => "ok".to_string(),
                Err(err) => {
                    failures += 1;
                    format!("{}: {err}", err.kind())
                }
            };
            rows.push(VerifyRow {
                index,
                event_type: wire.event_type,
                source: wire.source,
                timestamp: wire.timestamp.to_string(),
                result,
            });
        }

        let total = rows.len();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");

        if failures > 0 {
            println!("{}", format!("{failures} of {total} event(s) rejected").red().bold());
            bail!("{failures} event(s) failed verification");
        }
        println!("{}", format!("{total} event(s) verified").green().bold());
        Ok(())
    }
}
