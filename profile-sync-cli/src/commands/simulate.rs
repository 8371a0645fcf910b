//! `profile-sync simulate`: several contexts sharing one session, driven by
//! a virtual clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};
use uuid::Uuid;

use profile_sync_core::{
    config, EventData, ManualScheduler, ProfileChangeEvent, SyncMetrics, Theme,
};
use profile_sync_orchestrator::{SessionEnvironment, SyncOrchestrator};

const BASE_TIMESTAMP: u64 = 1_700_000_000_000;
const THEMES: [Theme; 3] = [Theme::Light, Theme::Dark, Theme::System];

/// Arguments for `profile-sync simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Number of contexts in the session (the first one broadcasts).
    #[arg(long, default_value_t = 3)]
    pub contexts: usize,

    /// Theme changes broadcast by the first context.
    #[arg(long, default_value_t = 20)]
    pub events: usize,

    /// Virtual milliseconds between changes.
    #[arg(long, default_value_t = 10)]
    pub interval_ms: u64,

    /// Use adaptive delivery (debounce and batching) instead of throttling.
    #[arg(long)]
    pub optimized: bool,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

struct SimContext {
    orchestrator: SyncOrchestrator,
    last_seen: Arc<AtomicU64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextReport {
    context: usize,
    role: &'static str,
    metrics: SyncMetrics,
    last_seen: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationReport {
    events: usize,
    last_timestamp: u64,
    converged: bool,
    contexts: Vec<ContextReport>,
}

#[derive(Tabled)]
struct SimulationRow {
    #[tabled(rename = "context")]
    context: usize,
    #[tabled(rename = "role")]
    role: &'static str,
    #[tabled(rename = "sent")]
    sent: u64,
    #[tabled(rename = "received")]
    received: u64,
    #[tabled(rename = "coalesced")]
    coalesced: u64,
    #[tabled(rename = "batches")]
    batches: u64,
    #[tabled(rename = "last seen")]
    last_seen: String,
}

impl SimulateArgs {
    pub fn run(self) -> Result<()> {
        if self.contexts < 2 {
            bail!("--contexts must be at least 2");
        }
        if self.events == 0 {
            bail!("--events must be at least 1");
        }

        let sync_config = config::SyncConfig {
            probe_interval_ms: 0,
            ..config::SyncConfig::default()
        };

        let env = SessionEnvironment::full();
        let scheduler = Arc::new(ManualScheduler::new());
        let contexts = (0..self.contexts)
            .map(|_| {
                let orchestrator =
                    SyncOrchestrator::connect(sync_config.clone(), &env, scheduler.clone())
                        .context("failed to start context")?;
                let last_seen = Arc::new(AtomicU64::new(0));
                let sink = last_seen.clone();
                orchestrator.subscribe(move |event: &ProfileChangeEvent| {
                    sink.fetch_max(event.timestamp(), Ordering::SeqCst);
                });
                Ok(SimContext {
                    orchestrator,
                    last_seen,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let user_id = Uuid::new_v4();
        let sender = &contexts[0].orchestrator;
        let step = Duration::from_millis(self.interval_ms);
        let timestamp = |i: usize| BASE_TIMESTAMP + i as u64 * self.interval_ms;
        let last_timestamp = timestamp(self.events - 1);
        for i in 0..self.events {
            let data = EventData::from(THEMES[i % THEMES.len()]);
            let event = ProfileChangeEvent::new(data, timestamp(i), "simulator", user_id)
                .context("failed to build event")?;
            let outcome = if self.optimized {
                sender.broadcast_optimized(event)
            } else {
                sender.broadcast(event)
            };
            let outcome = outcome.context("broadcast failed")?;
            tracing::debug!(index = i, ?outcome, "broadcast");
            scheduler.advance(step);
        }
        // Drain trailing sends, debounces and batches.
        let settle = sync_config.debounce_delay() + sync_config.throttle_delay() * 2;
        scheduler.advance(settle);

        let reports: Vec<ContextReport> = contexts
            .iter()
            .enumerate()
            .map(|(index, ctx)| {
                let seen = ctx.last_seen.load(Ordering::SeqCst);
                ContextReport {
                    context: index,
                    role: if index == 0 { "sender" } else { "receiver" },
                    metrics: ctx.orchestrator.metrics(),
                    last_seen: (seen > 0).then_some(seen),
                }
            })
            .collect();
        let converged = reports
            .iter()
            .skip(1)
            .all(|report| report.last_seen == Some(last_timestamp));

        for ctx in &contexts {
            ctx.orchestrator.dispose();
        }

        let report = SimulationReport {
            events: self.events,
            last_timestamp,
            converged,
            contexts: reports,
        };
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize report")?
            );
        } else {
            print_table(report);
        }
        Ok(())
    }
}

fn print_table(report: SimulationReport) {
    println!(
        "{} events across {} contexts, last change at {}",
        report.events,
        report.contexts.len(),
        report.last_timestamp
    );
    let rows: Vec<SimulationRow> = report
        .contexts
        .into_iter()
        .map(|ctx| SimulationRow {
            context: ctx.context,
            role: ctx.role,
            sent: ctx.metrics.sent,
            received: ctx.metrics.received,
            coalesced: ctx.metrics.coalesced,
            batches: ctx.metrics.batches_sent,
            last_seen: ctx
                .last_seen
                .map(|ts| ts.to_string())
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if report.converged {
        println!("{}", "converged: every receiver saw the last change".green().bold());
    } else {
        println!("{}", "diverged: some receivers missed the last change".red().bold());
    }
}
