use anyhow::Result;
use regindex::config::Config;

use super::open_workspace;

pub async fn show_stats(config: Config) -> Result<()> {
    let workspace = open_workspace(config)?;
    let stats = workspace.store.stats()?;

    println!("\nregindex Statistics:");
    println!("====================");
    println!("Data directory: {}", workspace.config.data.data_dir.display());
    println!("Companies: {}", stats.companies);
    println!("Enriched companies: {}", stats.enriched);
    println!("Ownership edges: {}", stats.ownership_edges);
    println!("Person index entries: {}", stats.person_entries);
    if stats.derived_generation == 0 {
        println!("Derived index: not built");
    } else {
        println!("Derived index generation: {}", stats.derived_generation);
    }

    if !stats.by_status.is_empty() {
        println!("\nBy status:");
        for (status, count) in &stats.by_status {
            println!("  {:<12} {}", status, count);
        }
    }

    let pending = workspace.checkpoints.pending()?;
    if !pending.is_empty() {
        println!("\n{} merged files not yet indexed", pending.len());
    }

    Ok(())
}
