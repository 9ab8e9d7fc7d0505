//! Status command

use crate::config::Config;
use anyhow::{Context, Result};
use tributary_storage::RunRepository;
use uuid::Uuid;

/// Print the run rows of one data source
pub async fn execute(config: &Config, data_source: &str) -> Result<()> {
    let data_source_id =
        Uuid::parse_str(data_source).with_context(|| format!("Invalid data source id: {}", data_source))?;
    let storage = super::connect(config).await?;

    let data_source = storage.get_data_source(data_source_id).await?;
    println!("Data source: {}", data_source.id);
    println!("Tenant: {}", data_source.tenant_id);
    println!("Provider: {}", data_source.provider);
    println!("Enabled: {}", data_source.enabled);

    let runs = storage.list_runs(data_source_id).await?;
    if runs.is_empty() {
        println!("No runs recorded");
        return Ok(());
    }

    for run in runs {
        println!();
        println!("Script: {}", run.script_name);
        println!("  Status: {}", run.status);
        println!("  Batch: {}", run.batch_id);
        println!("  Records: {}", run.records_imported);
        if let Some(last) = run.last_fetched_data_at {
            println!("  Last fetched: {}", last);
        }
        if let Some(earliest) = run.earliest_fetched_data_at {
            println!("  Earliest fetched: {}", earliest);
        }
        if let Some(completed) = run.completed_at {
            println!("  Completed: {}", completed);
        }
        if let Some(err) = run.error_message {
            println!("  Error: {}", err);
        }
    }

    Ok(())
}
