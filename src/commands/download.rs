use anyhow::{Context, Result};
use regindex::config::Config;
use regindex::download::{DownloadReport, HttpFetcher};
use std::sync::Arc;
use tracing::info;

use super::open_workspace;

pub async fn download_files(config: Config, quiet: bool) -> Result<()> {
    let fetcher = HttpFetcher::new(&config.download).context("Failed to create HTTP client")?;
    let workspace = open_workspace(config)?;

    info!("Downloading into {}", workspace.config.data.downloads_dir().display());
    let report = workspace.download(Arc::new(fetcher), quiet).await;
    print_download_report(&report);

    Ok(())
}

pub(crate) fn print_download_report(report: &DownloadReport) {
    println!("\nDownloads:");
    println!("==========");
    for file in &report.files {
        println!("  {:<50} {}", file.name, file.outcome);
    }
    let failed = report.failures().count();
    if failed > 0 {
        println!("{} of {} files failed; run again to resume", failed, report.files.len());
    }
}
