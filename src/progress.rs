//! Progress reporting infrastructure

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::borrow::Cow;

/// CLI progress report of ongoing operations
///
/// To avoid corrupted terminal output, you should not write anything to stdout
/// or stderr yourself as long as a report is being displayed. Please use logs
/// for debug messages.
#[derive(Clone, Debug, Default)]
pub struct ProgressReport(MultiProgress);
//
impl ProgressReport {
    /// Prepare to report progress on the cli
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare to report on a new operation
    pub fn add(
        &self,
        what: impl Into<Cow<'static, str>>,
        config: ProgressConfig,
    ) -> ProgressTracker {
        let ProgressConfig {
            steps,
            show_rate_eta,
        } = config;
        let style_trailer = if show_rate_eta {
            "{pos}/{len} (~{eta} left)"
        } else {
            "{pos}/{len}"
        };
        let bar = ProgressBar::new(steps as u64)
            .with_prefix(what)
            .with_style(
                ProgressStyle::with_template(&format!("{{prefix}} {{wide_bar}} {style_trailer}"))
                    .expect("all styles above should be valid indicatif styles"),
            );
        ProgressTracker(self.0.add(bar))
    }
}

/// Progress bar configuration
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProgressConfig {
    /// Number of steps to be taken
    steps: usize,

    /// Show the estimated remaining time
    show_rate_eta: bool,
}
//
impl ProgressConfig {
    /// Default configuration, with some amount of steps
    pub fn new(steps: usize) -> Self {
        Self {
            steps,
            show_rate_eta: true,
        }
    }

    /// Disable display of the estimated remaining time
    pub fn dont_show_rate_eta(self) -> Self {
        Self {
            show_rate_eta: false,
            ..self
        }
    }
}

/// Mechanism to track progress
#[derive(Clone, Debug)]
pub struct ProgressTracker(ProgressBar);
//
impl ProgressTracker {
    /// Show that a certain amount of progress has been made
    pub fn make_progress(&self, progress: u64) {
        self.0.inc(progress);
    }

    /// Reset remaining time estimate
    ///
    /// Skipped steps are much faster than actual work, and would otherwise
    /// make the estimate overly optimistic.
    pub fn reset_eta(&self) {
        self.0.reset_eta();
    }

    /// Hide the progress bar once the operation is over
    pub fn finish(&self) {
        self.0.finish_and_clear();
    }
}
