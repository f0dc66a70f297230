use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use vmctl_core::supervisor::{Phase, Rollout, RolloutReport};

use crate::config;

/// Run the rollout described by `path` and print the per-target report.
///
/// Exits the process with status 1 when the aggregated outcome is Failed.
pub async fn run_rollout_file(path: &Path) -> Result<()> {
    let (targets, rollout_config) = config::load_rollout(path)
        .with_context(|| format!("failed to load rollout file {}", path.display()))?;

    println!("Rolling out to {} target(s)...", targets.len());

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling rollout, closing connections...");
            cancel_clone.cancel();
        }
    });

    let report = Rollout::new(targets, rollout_config).run(cancel).await;
    print_report(&report);

    if report.is_failed() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &RolloutReport) {
    println!();
    for target in &report.targets {
        let marker = match target.phase {
            Phase::Started => "ok",
            Phase::Failed => "FAILED",
            _ => "stopped",
        };
        println!(
            "  {:<7} {:<16} {:<24} {}",
            marker, target.name, target.address, target.outcome.message
        );
        for (key, value) in &target.outcome.details {
            println!("          {key}: {value}");
        }
    }
    println!();
    println!("Rollout {}.", report.outcome.status);
}
