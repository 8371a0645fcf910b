pub mod config;
pub mod serialize;
pub mod simulate;
pub mod validate;
pub mod verify;

use anyhow::{Context, Result};
use serde_json::Value;

/// Resolve a text argument: inline, or `@path` to read it from a file.
pub fn read_arg(input: &str) -> Result<String> {
    match input.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("failed to read {path}")),
        None => Ok(input.to_string()),
    }
}

/// [`read_arg`], parsed as JSON.
pub fn read_json_arg(input: &str) -> Result<Value> {
    serde_json::from_str(&read_arg(input)?).context("input is not valid JSON")
}
