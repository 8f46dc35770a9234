use anyhow::Result;
use regindex::config::Config;
use regindex::import::MergeReport;
use tracing::info;

use super::open_workspace;

pub async fn merge_files(config: Config, force: bool, max_records: Option<u64>, quiet: bool) -> Result<()> {
    let workspace = open_workspace(config)?;

    let (sources, problems) = workspace.prepare_sources();
    for problem in &problems {
        println!("Skipping {}: {}", problem.file_name, problem.reason);
    }
    if sources.is_empty() {
        println!("No downloaded files to merge. Run `regindex download` first.");
        return Ok(());
    }

    let mut engine = workspace.merge_engine(force, quiet);
    if max_records.is_some() {
        engine = engine.with_max_records(max_records);
    }
    info!("Merging {} files", sources.len());
    let report = engine.merge_all(&sources);
    print_merge_report(&report);

    Ok(())
}

pub(crate) fn print_merge_report(report: &MergeReport) {
    println!("\nMerge:");
    println!("======");
    for source in &report.sources {
        println!(
            "  {:<50} {} ({} records, {} batches)",
            source.source, source.outcome, source.stats.records_committed, source.stats.batches
        );
    }
    let totals = report.totals();
    println!(
        "Committed {} records: {} inserted, {} updated, {} unchanged",
        totals.records_committed, totals.changes.inserted, totals.changes.updated, totals.changes.unchanged
    );
}
