use anyhow::Result;
use regindex::config::Config;
use regindex::index::{BuildMode, BuildReport};
use std::time::Instant;

use super::open_workspace;

pub async fn build_index(config: Config, force: bool, quiet: bool) -> Result<()> {
    let workspace = open_workspace(config)?;
    let mode = if force { BuildMode::Force } else { BuildMode::Incremental };

    let start = Instant::now();
    let report = workspace.index_builder(quiet).build(mode)?;
    print_build_report(&report);
    if !report.skipped {
        println!("Elapsed: {:.1}s", start.elapsed().as_secs_f64());
    }

    Ok(())
}

pub(crate) fn print_build_report(report: &BuildReport) {
    if report.skipped {
        println!("Derived index is up to date (use --force to rebuild)");
        return;
    }
    println!("\nDerived index:");
    println!("==============");
    println!("Generation: {}", report.counts.generation);
    println!("Companies scanned: {}", report.companies);
    println!("Derived fields updated: {}", report.derived_updated);
    println!("Ownership edges: {}", report.counts.edges);
    println!("Person entries: {}", report.counts.persons);
    if !report.sources.is_empty() {
        let sources: Vec<&str> = report.sources.iter().map(String::as_str).collect();
        println!("Covers: {}", sources.join(", "));
    }
}
