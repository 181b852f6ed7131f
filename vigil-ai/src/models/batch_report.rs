//! Batch run report
//!
//! Built by the scheduler's single collector loop and returned from
//! `BatchScheduler::run`. Never shared across tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vigil_common::human_time::{format_eta, format_seconds};

/// Maximum representative error samples retained per report
pub const MAX_ERROR_SAMPLES: usize = 5;

/// One representative item-scoped failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSample {
    pub work_item_id: i64,
    pub kind: String,
    pub detail: String,
}

/// Outcome summary of one `run(model, concurrency, filter)` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub model_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Size of the pending set at dispatch time
    pub pending_total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,

    /// Data-quality anomalies seen in adapter output
    pub anomalies: usize,
    /// Ensemble verdicts written or rewritten during this run
    pub verdicts_written: usize,

    /// Mean per-item latency over completed inferences (milliseconds)
    pub mean_latency_ms: f64,
    /// Completed items per second of wall-clock time
    pub throughput_per_sec: f64,
    /// Last ETA estimate (seconds), `None` until enough samples exist
    pub eta_seconds: Option<u64>,

    pub error_samples: Vec<ErrorSample>,
    /// Run stopped early by a cancellation signal
    pub cancelled: bool,
}

impl BatchReport {
    pub fn new(run_id: Uuid, model_id: impl Into<String>, pending_total: usize) -> Self {
        Self {
            run_id,
            model_id: model_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            pending_total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            anomalies: 0,
            verdicts_written: 0,
            mean_latency_ms: 0.0,
            throughput_per_sec: 0.0,
            eta_seconds: None,
            error_samples: Vec::new(),
            cancelled: false,
        }
    }

    /// Items with a recorded outcome
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Items never attempted (only non-zero after cancellation)
    pub fn not_attempted(&self) -> usize {
        self.pending_total.saturating_sub(self.completed())
    }

    /// Retain a failure sample, keeping only the first few
    pub fn record_error(
        &mut self,
        work_item_id: i64,
        kind: impl Into<String>,
        detail: impl Into<String>,
    ) {
        if self.error_samples.len() < MAX_ERROR_SAMPLES {
            self.error_samples.push(ErrorSample {
                work_item_id,
                kind: kind.into(),
                detail: detail.into(),
            });
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    /// Close the report and compute throughput
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
        let elapsed = self.elapsed_seconds();
        self.throughput_per_sec = if elapsed > 0.0 {
            self.completed() as f64 / elapsed
        } else {
            0.0
        };
        if !self.cancelled && self.not_attempted() == 0 {
            self.eta_seconds = Some(0);
        }
    }

    /// Multi-line text summary for the CLI
    pub fn summary(&self) -> String {
        let mut out = format!(
            concat!(
                "Model {} (run {}){}\n",
                "  pending: {}  succeeded: {}  failed: {}  skipped: {}\n",
                "  elapsed: {}  mean latency: {:.0}ms  throughput: {:.2}/s  eta: {}\n",
                "  anomalies: {}  verdicts written: {}"
            ),
            self.model_id,
            self.run_id,
            if self.cancelled { " [cancelled]" } else { "" },
            self.pending_total,
            self.succeeded,
            self.failed,
            self.skipped,
            format_seconds(self.elapsed_seconds()),
            self.mean_latency_ms,
            self.throughput_per_sec,
            format_eta(self.eta_seconds),
            self.anomalies,
            self.verdicts_written,
        );
        for sample in &self.error_samples {
            out.push_str(&format!(
                "\n  error: item {} [{}] {}",
                sample.work_item_id, sample.kind, sample.detail
            ));
        }
        out
    }
}
