//! Run command implementation.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use console::style;
use tracing::debug;

use qvirt_sched::{Job, JobFailure, Pipeline};

use super::common::{CliConfig, load_jobs, print_outcome};

/// Execute the run command.
pub async fn execute(config: Option<&str>, jobs: &str, top: usize) -> Result<()> {
    let config = CliConfig::load(config)?;
    let jobs = load_jobs(jobs)?;

    println!(
        "{} Running {} jobs on {} devices",
        style("→").cyan().bold(),
        jobs.len(),
        if config.devices.is_empty() {
            "default simulated".to_string()
        } else {
            config.devices.len().to_string()
        }
    );

    let mut pipeline = Pipeline::builder(config.provider(), config.pipeline.clone())
        .build()?
        .start();

    let mut pending = BTreeSet::new();
    for job in jobs {
        pending.insert(pipeline.submit(job)?);
    }

    let mut completed = 0usize;
    let mut failed = 0usize;
    while !pending.is_empty() {
        tokio::select! {
            Some(job) = pipeline.egress.recv() => {
                if pending.remove(&job.id()) {
                    completed += 1;
                    print_completed(&job, top);
                }
            }
            Some(failure) = pipeline.errors.recv() => {
                if pending.remove(&failure.job_id) {
                    failed += 1;
                    print_failed(&failure);
                } else {
                    debug!(job = %failure.job_id, "Failure for an internal job: {}", failure.error);
                }
            }
            else => break,
        }
    }

    let drained = pipeline.shutdown().await;
    debug!(
        completed = drained.completed.len(),
        failed = drained.failed.len(),
        "Drained after shutdown"
    );
    if let Some(e) = drained.stage_error {
        return Err(e).context("pipeline stage failed");
    }

    println!(
        "\n{} {} completed, {} failed",
        style("Done:").bold(),
        style(completed).green(),
        if failed > 0 {
            style(failed).red()
        } else {
            style(failed).dim()
        }
    );
    if failed > 0 {
        anyhow::bail!("{failed} of {} jobs failed", completed + failed);
    }
    Ok(())
}

fn print_completed(job: &Job, top: usize) {
    let strategy = job
        .strategy()
        .map_or_else(|| "untagged".to_string(), |s| s.to_string());
    println!(
        "\n{} {} ({} on {}, {} qubits)",
        style("✓").green().bold(),
        style(job.id()).cyan(),
        strategy,
        style(job.device_name().unwrap_or("?")).yellow(),
        job.num_qubits()
    );
    if let Some(outcome) = job.outcome() {
        println!("    {} shots", outcome.shots);
        print_outcome(outcome, top);
    }
}

fn print_failed(failure: &JobFailure) {
    println!(
        "\n{} {}: {}",
        style("✗").red().bold(),
        style(failure.job_id).cyan(),
        failure.error
    );
}
