//! profile-sync: inspect and exercise the cross-context profile sync engine.
//!
//! # Usage
//!
//! ```text
//! profile-sync validate <json|@file>
//! profile-sync serialize <json|@file> [--checksum rolling|sha256]
//! profile-sync verify <wire-json|@file> [--checksum rolling|sha256]
//! profile-sync simulate [--contexts N] [--events M] [--optimized] [--json]
//! profile-sync config [--file <path>] [--json]
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    config::ConfigArgs, serialize::SerializeArgs, simulate::SimulateArgs,
    validate::ValidateArgs, verify::VerifyArgs,
};
use profile_sync_core::ChecksumAlgorithm;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "profile-sync",
    version,
    about = "Validate, encode and simulate cross-context profile change events",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check a raw profile change event against the event schema.
    Validate(ValidateArgs),

    /// Validate, sanitize and encode an event into its wire form.
    Serialize(SerializeArgs),

    /// Decode a wire event or batch frame and check its integrity.
    Verify(VerifyArgs),

    /// Run several in-process contexts over a shared channel.
    Simulate(SimulateArgs),

    /// Print the effective sync configuration.
    Config(ConfigArgs),
}

// ---------------------------------------------------------------------------
// Shared checksum argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `ChecksumAlgorithm` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumArg(pub ChecksumAlgorithm);

impl FromStr for ChecksumArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rolling" => Ok(Self(ChecksumAlgorithm::Rolling)),
            "sha256" => Ok(Self(ChecksumAlgorithm::Sha256)),
            other => Err(format!(
                "unknown checksum '{other}'; expected: rolling, sha256"
            )),
        }
    }
}

impl fmt::Display for ChecksumArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ChecksumAlgorithm::Rolling => write!(f, "rolling"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

impl From<ChecksumArg> for ChecksumAlgorithm {
    fn from(arg: ChecksumArg) -> Self {
        arg.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(args) => args.run(),
        Commands::Serialize(args) => args.run(),
        Commands::Verify(args) => args.run(),
        Commands::Simulate(args) => args.run(),
        Commands::Config(args) => args.run(),
    }
}

/// Logs go to stderr so command output stays machine-readable.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
