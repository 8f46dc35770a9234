use anyhow::{Context, Result};
use regindex::config::Config;
use regindex::download::HttpFetcher;
use regindex::SyncOptions;
use std::sync::Arc;
use std::time::Instant;

use super::download::print_download_report;
use super::index::print_build_report;
use super::merge::print_merge_report;
use super::open_workspace;

pub async fn run_sync(config: Config, force: bool, quiet: bool) -> Result<()> {
    let fetcher = HttpFetcher::new(&config.download).context("Failed to create HTTP client")?;
    let workspace = open_workspace(config)?;

    let start = Instant::now();
    let report = workspace.sync(Arc::new(fetcher), SyncOptions { force, quiet }).await;

    print_download_report(&report.download);
    for problem in &report.skipped {
        println!("Skipped {}: {}", problem.file_name, problem.reason);
    }
    print_merge_report(&report.merge);
    if let Ok(build) = &report.index {
        print_build_report(build);
    }

    println!("\nSync finished in {:.1}s", start.elapsed().as_secs_f64());
    let failures = report.failure_lines();
    if !failures.is_empty() {
        println!("{} problems (run sync again to resume):", failures.len());
        for line in failures {
            println!("  - {}", line);
        }
    }

    Ok(())
}
