//! Progress reporting for merges

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Instant;

use super::source::MergeStats;
use crate::util::truncate_str;

/// Byte-based progress bar for one file
pub struct MergeProgress {
    /// Progress bar (None if running in quiet mode)
    progress_bar: Option<ProgressBar>,
    start_time: Instant,
    /// Offset the run started at
    start_offset: u64,
}

impl MergeProgress {
    pub fn new(source: &str, total_bytes: u64, start_offset: u64, quiet: bool) -> Self {
        let progress_bar = if !quiet {
            let pb = ProgressBar::new(total_bytes);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {prefix:30} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_prefix(truncate_str(source, 30));
            pb.set_position(start_offset);
            Some(pb)
        } else {
            None
        };

        Self {
            progress_bar,
            start_time: Instant::now(),
            start_offset,
        }
    }

    /// Update after a committed batch
    pub fn batch_committed(&self, offset: u64, stats: &MergeStats) {
        if let Some(ref pb) = self.progress_bar {
            pb.set_position(offset);
            pb.set_message(format!("{:.0} records/s", self.rate(stats)));
        }
    }

    /// Records per second in this run
    pub fn rate(&self, stats: &MergeStats) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            stats.records_committed as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Bytes consumed since the run started
    pub fn bytes_since_start(&self, offset: u64) -> u64 {
        offset.saturating_sub(self.start_offset)
    }

    pub fn finish(&self, stats: &MergeStats) {
        if let Some(ref pb) = self.progress_bar {
            pb.finish_with_message(format!(
                "{} records, {} new, {} updated",
                stats.records_committed, stats.changes.inserted, stats.changes.updated
            ));
        }
    }

    pub fn abandon(&self, reason: &str) {
        if let Some(ref pb) = self.progress_bar {
            pb.abandon_with_message(truncate_str(reason, 60));
        }
    }
}
