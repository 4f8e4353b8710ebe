use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Per-run state handed to every pipeline stage.
#[derive(Clone)]
pub struct RunContext {
    run_id: String,
    show_progress: bool,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(show_progress: bool) -> Self {
        Self {
            run_id: Utc::now().format("%Y%m%dT%H%M%S").to_string(),
            show_progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Context without progress bars, for tests.
    #[cfg(test)]
    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep unless the run is cancelled first. Returns false on cancellation.
    pub async fn sleep(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Drive `fut` to completion unless the run is cancelled first.
    pub async fn guard<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    pub fn progress_bar(&self, len: u64, message: impl Into<String>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{msg} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(message.into());
        pb
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Extract,
    Enrich,
    Load,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Extract => "extract",
            Phase::Enrich => "enrich",
            Phase::Load => "load",
        })
    }
}

/// Start/end timestamps and item count of one finished phase.
#[derive(Debug, Clone)]
pub struct PhaseReport {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub items: usize,
}

impl PhaseReport {
    pub fn start(phase: Phase) -> PhaseTimer {
        PhaseTimer {
            phase,
            started_at: Utc::now(),
        }
    }

    pub fn seconds(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

pub struct PhaseTimer {
    phase: Phase,
    started_at: DateTime<Utc>,
}

impl PhaseTimer {
    pub fn finish(self, ctx: &RunContext, items: usize) -> PhaseReport {
        let report = PhaseReport {
            phase: self.phase,
            started_at: self.started_at,
            finished_at: Utc::now(),
            items,
        };
        info!(
            run_id = ctx.run_id(),
            phase = %report.phase,
            started_at = %report.started_at.to_rfc3339(),
            finished_at = %report.finished_at.to_rfc3339(),
            items = report.items,
            "{} phase took {:.2} seconds",
            report.phase,
            report.seconds()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sleep_returns_false_once_cancelled() {
        let ctx = RunContext::quiet();
        ctx.cancel_token().cancel();
        assert!(!ctx.sleep(Duration::from_secs(3600)).await);
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_completes_when_not_cancelled() {
        let ctx = RunContext::quiet();
        assert!(ctx.sleep(Duration::from_secs(5)).await);
    }

    #[test]
    fn finished_report_keeps_order_of_timestamps() {
        let ctx = RunContext::quiet();
        let report = PhaseReport::start(Phase::Load).finish(&ctx, 12);
        assert_eq!(report.items, 12);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(report.phase.to_string(), "load");
    }
}
