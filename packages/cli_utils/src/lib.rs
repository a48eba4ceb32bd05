#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared CLI utilities for the paddle mirror toolchain.
//!
//! Provides an `indicatif`-backed [`StatusSink`] that renders ingestion
//! status events as a progress bar, plus [`init_logger`] which sets up
//! `indicatif-log-bridge` so that `log::info!` and friends are suspended
//! while progress bars redraw.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use paddle_mirror_ingest_models::{IngestionStatus, StatusKind, StatusSink};

pub use indicatif::MultiProgress;

/// An `indicatif` [`ProgressBar`] that implements [`StatusSink`].
///
/// Starts as a spinner and switches to a percentage bar on the first
/// event carrying a progress value. Idle events finish the bar.
pub struct IndicatifStatusSink {
    bar: ProgressBar,
    /// Style to switch to once a percentage arrives.
    bar_style: ProgressStyle,
}

impl IndicatifStatusSink {
    /// Creates a sink whose bar is added to `multi`.
    #[must_use]
    pub fn ingestion_bar(multi: &MultiProgress, message: &str) -> Arc<dyn StatusSink> {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());

        let bar_style = ProgressStyle::with_template(
            "  {msg} {wide_bar:.cyan/dim} {pos}% [{elapsed_precise}]",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");

        Arc::new(Self { bar, bar_style })
    }
}

impl StatusSink for IndicatifStatusSink {
    fn emit(&self, status: IngestionStatus) {
        if let Some(pct) = status.progress {
            if self.bar.length().is_none() {
                self.bar.set_length(100);
                self.bar.set_style(self.bar_style.clone());
            }
            self.bar.set_position(u64::from(pct));
        }

        let message = status.message.unwrap_or_default();
        match status.status {
            StatusKind::Uploading => self.bar.set_message(message),
            StatusKind::Idle => self.bar.finish_with_message(message),
        }
    }
}

/// Initializes the global logger wrapped in `indicatif-log-bridge` so that
/// `log::info!` and friends are suspended while progress bars redraw.
///
/// Returns the [`MultiProgress`] that all progress bars must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // already set in tests

    log::set_max_level(level);

    multi
}

#[cfg(test)]
mod tests {
    use indicatif::ProgressDrawTarget;

    use super::*;

    #[test]
    fn tracks_percentage_and_finishes_on_idle() {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::hidden());
        let bar = multi.add(ProgressBar::new_spinner());
        let sink = IndicatifStatusSink {
            bar: bar.clone(),
            bar_style: ProgressStyle::default_bar(),
        };

        sink.emit(IngestionStatus::uploading("k", "page 1", Some(40)));
        assert_eq!(bar.length(), Some(100));
        assert_eq!(bar.position(), 40);
        assert!(!bar.is_finished());

        sink.emit(IngestionStatus::idle("k", "done", Some(100)));
        assert_eq!(bar.position(), 100);
        assert!(bar.is_finished());
        assert_eq!(bar.message(), "done");
    }
}
