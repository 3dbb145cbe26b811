//! Download and extraction progress reporting
//!
//! Workers emit `(file name, percent)` samples on two independent channels,
//! one per stage. A single task folds both into per-stage totals and drives
//! the operator-facing bars. The task ends once every sender of both channels
//! has been dropped.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::debug;

/// Percentage-complete sample for one file
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    pub file_name: String,
    pub percent: f64,
}

impl ProgressSample {
    pub fn new(file_name: impl Into<String>, percent: f64) -> Self {
        Self {
            file_name: file_name.into(),
            percent,
        }
    }
}

/// Sending side handed to every worker
#[derive(Debug, Clone)]
pub struct ProgressChannels {
    pub download: UnboundedSender<ProgressSample>,
    pub extract: UnboundedSender<ProgressSample>,
}

impl ProgressChannels {
    /// Report download progress; a closed reporter is not an error for the worker
    pub fn download(&self, file_name: &str, percent: f64) {
        let _ = self.download.send(ProgressSample::new(file_name, percent));
    }

    pub fn extract(&self, file_name: &str, percent: f64) {
        let _ = self.extract.send(ProgressSample::new(file_name, percent));
    }

    /// Channels whose samples go nowhere
    pub fn disconnected() -> Self {
        let (download, _) = mpsc::unbounded_channel();
        let (extract, _) = mpsc::unbounded_channel();
        Self { download, extract }
    }
}

/// Last percentage seen per file, for each stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSummary {
    pub download: HashMap<String, f64>,
    pub extract: HashMap<String, f64>,
}

impl ProgressSummary {
    pub fn completed_extractions(&self) -> usize {
        self.extract.values().filter(|p| **p >= 100.0).count()
    }
}

struct StageBar {
    bar: ProgressBar,
    files: HashMap<String, f64>,
}

impl StageBar {
    fn new(multi: &MultiProgress, total: usize, label: &str) -> Self {
        let bar = multi.add(ProgressBar::new(total as u64 * 100));
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{prefix:>9} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar.set_prefix(label.to_string());
        Self {
            bar,
            files: HashMap::new(),
        }
    }

    fn record(&mut self, sample: ProgressSample) {
        let percent = sample.percent.clamp(0.0, 100.0);
        let previous = self.files.insert(sample.file_name.clone(), percent).unwrap_or(0.0);
        if percent > previous {
            self.bar.inc((percent - previous).round() as u64);
        }
        self.bar.set_message(sample.file_name);
    }

    fn finish(self) -> HashMap<String, f64> {
        self.bar.finish_and_clear();
        self.files
    }
}

/// Handle on the running progress task
pub struct ProgressReporter {
    handle: JoinHandle<ProgressSummary>,
}

impl ProgressReporter {
    /// Spawn the aggregation task for `total` archives
    pub fn spawn(total: usize, visible: bool) -> (ProgressChannels, Self) {
        let (download_tx, download_rx) = mpsc::unbounded_channel();
        let (extract_tx, extract_rx) = mpsc::unbounded_channel();

        let multi = if visible {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let handle = tokio::spawn(aggregate(multi, total, download_rx, extract_rx));

        (
            ProgressChannels {
                download: download_tx,
                extract: extract_tx,
            },
            Self { handle },
        )
    }

    /// Wait for every sender to be dropped and return the final percentages
    pub async fn finish(self) -> ProgressSummary {
        self.handle.await.unwrap_or_default()
    }
}

async fn aggregate(
    multi: MultiProgress,
    total: usize,
    mut download_rx: UnboundedReceiver<ProgressSample>,
    mut extract_rx: UnboundedReceiver<ProgressSample>,
) -> ProgressSummary {
    let mut download = StageBar::new(&multi, total, "download");
    let mut extract = StageBar::new(&multi, total, "extract");
    let mut download_open = true;
    let mut extract_open = true;

    loop {
        tokio::select! {
            sample = download_rx.recv(), if download_open => match sample {
                Some(sample) => download.record(sample),
                None => download_open = false,
            },
            sample = extract_rx.recv(), if extract_open => match sample {
                Some(sample) => extract.record(sample),
                None => extract_open = false,
            },
            else => break,
        }
    }

    debug!("Progress channels closed");

    ProgressSummary {
        download: download.finish(),
        extract: extract.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_keeps_last_sample_per_stage() {
        let (channels, reporter) = ProgressReporter::spawn(2, false);

        channels.download("A.zip", 40.0);
        channels.download("A.zip", 100.0);
        channels.extract("A.zip", 250.0);
        channels.download("B.zip", -5.0);
        drop(channels);

        let summary = reporter.finish().await;
        assert_eq!(summary.download.get("A.zip"), Some(&100.0));
        assert_eq!(summary.download.get("B.zip"), Some(&0.0));
        assert_eq!(summary.extract.get("A.zip"), Some(&100.0));
        assert_eq!(summary.completed_extractions(), 1);
    }

    #[tokio::test]
    async fn test_reporter_ends_when_senders_dropped() {
        let (channels, reporter) = ProgressReporter::spawn(0, false);
        let clone = channels.clone();
        drop(channels);
        clone.extract("late.zip", 100.0);
        drop(clone);

        let summary = reporter.finish().await;
        assert!(summary.download.is_empty());
        assert_eq!(summary.extract.len(), 1);
    }
}
