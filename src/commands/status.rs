use anyhow::Result;
use regindex::config::Config;
use regindex::util::truncate_str;

use super::open_workspace;

pub async fn show_status(config: Config) -> Result<()> {
    let workspace = open_workspace(config)?;

    println!("\nTransfers:");
    println!("==========");
    let transfers = workspace.transfers.list()?;
    if transfers.is_empty() {
        println!("  nothing downloaded yet");
    }
    for (name, state) in &transfers {
        let progress = if state.is_complete() {
            "complete".to_string()
        } else {
            match state.progress() {
                Some(fraction) => format!("{:.1}%", fraction * 100.0),
                None => format!("{} bytes", state.confirmed_bytes),
            }
        };
        println!("  {:<50} {}", truncate_str(name, 50), progress);
    }

    println!("\nMerged files:");
    println!("=============");
    let merged = workspace.checkpoints.list_merged()?;
    if merged.is_empty() {
        println!("  none");
    }
    for entry in &merged {
        println!(
            "  {:<50} {} records, {}",
            truncate_str(&entry.source, 50),
            entry.records,
            entry.completed_at.format("%Y-%m-%d %H:%M")
        );
    }

    let checkpoints = workspace.checkpoints.list()?;
    if !checkpoints.is_empty() {
        println!("\nInterrupted merges:");
        println!("===================");
        for checkpoint in &checkpoints {
            println!(
                "  {:<50} record {} at byte {} ({})",
                truncate_str(&checkpoint.source, 50),
                checkpoint.cursor.record_index,
                checkpoint.cursor.offset,
                checkpoint.fingerprint
            );
        }
    }

    let pending = workspace.checkpoints.pending()?;
    if !pending.is_empty() {
        println!("\nAwaiting index build: {}", pending.into_iter().collect::<Vec<_>>().join(", "));
    }

    Ok(())
}
