//! Run command: a single batch

use crate::config::Config;
use anyhow::Result;
use tributary_runtime::BatchSummary;

/// Run one batch and return its summary.
///
/// A catalog failure surfaces as an error; script failures are reported
/// in the summary.
pub async fn execute(config: &Config, json: bool) -> Result<BatchSummary> {
    let storage = super::connect(config).await?;
    let orchestrator = super::build_orchestrator(&storage, config).await?;

    let summary = orchestrator.run_batch().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(summary)
}

fn print_summary(summary: &BatchSummary) {
    println!("Batch: {}", summary.batch_id);
    println!(
        "Data sources: {} ({} without scripts)",
        summary.data_sources, summary.data_sources_without_scripts
    );
    println!("Succeeded: {}", summary.succeeded);
    println!("Skipped: {}", summary.skipped);
    println!("Upstream failed: {}", summary.upstream_failed);
    println!("Failed: {}", summary.failed);
    if summary.graph_errors > 0 {
        println!("Graph errors: {}", summary.graph_errors);
    }
    println!("Records imported: {}", summary.records_imported);
    println!("Duration: {:.1}s", summary.duration.as_secs_f64());

    for status in summary.scripts.iter().filter(|s| s.outcome != "succeeded") {
        println!(
            "  {} {} {}: {}",
            status.data_source_id,
            status.script,
            status.outcome,
            status.detail.as_deref().unwrap_or("-")
        );
    }
}
