//! Batch scheduler
//!
//! `run(model, concurrency, filter)` computes the pending set for a model,
//! drives a bounded worker pool over it, and returns a [`BatchReport`].
//!
//! # Architecture
//! - `concurrency` workers via `futures::stream::buffer_unordered`
//! - Each worker: preprocess → adapter call under the shared retry policy →
//!   persist the result → fuse the item if a fusion engine is attached
//! - A single collector loop owns the report and progress tracker; workers
//!   share no mutable state
//!
//! # Failure handling
//! Item-scoped failures are recorded as `failed`/`skipped` results and never
//! abort the batch. A store error (cannot read or write the work item store)
//! is fatal: remaining workers are cancelled and the error is returned.
//!
//! # Resumability
//! Results are persisted per item as soon as they exist; items with a
//! success are excluded from the next pending set, so an interrupted run
//! picks up where it left off without repeating inference calls.

pub mod filter;
pub mod progress;

pub use filter::WorkItemFilter;
pub use progress::ProgressTracker;

use crate::adapters::{ModelAdapter, ModelConfig, RetryPolicy};
use crate::cache::PreprocessingCache;
use crate::db::model_results::{self, InsertOutcome};
use crate::db::work_items;
use crate::error::AdapterError;
use crate::fusion::FusionEngine;
use crate::models::{BatchReport, ItemModelState, ModelResult, ResultError, WorkItem};
use crate::utils::retry_on_lock;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use vigil_common::events::{EventBus, VigilEvent};
use vigil_common::human_time::format_eta;
use vigil_common::{Error, Result};

/// One model the scheduler can run
#[derive(Clone)]
pub struct ModelBinding {
    pub config: ModelConfig,
    pub adapter: Arc<dyn ModelAdapter>,
}

/// What happened to one dispatched item
#[derive(Debug)]
enum ItemOutcome {
    /// A result was persisted
    Recorded {
        result: ModelResult,
        anomalies: usize,
        verdict_written: bool,
        /// Inference latency; `None` when no inference was attempted
        latency: Option<Duration>,
    },
    /// Another writer recorded a success first; nothing persisted
    AlreadySucceeded { work_item_id: i64 },
    /// Abandoned by cancellation; nothing persisted
    Cancelled { work_item_id: i64 },
}

pub struct BatchScheduler {
    pool: SqlitePool,
    cache: Arc<PreprocessingCache>,
    models: Vec<ModelBinding>,
    retry: RetryPolicy,
    fusion: Option<FusionEngine>,
    event_bus: Option<EventBus>,
    cancel: CancellationToken,
    progress_interval: usize,
    max_lock_wait_ms: u64,
}

impl BatchScheduler {
    pub fn new(pool: SqlitePool, cache: Arc<PreprocessingCache>, retry: RetryPolicy) -> Self {
        Self {
            pool,
            cache,
            models: Vec::new(),
            retry,
            fusion: None,
            event_bus: None,
            cancel: CancellationToken::new(),
            progress_interval: 10,
            max_lock_wait_ms: crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    /// Register a model; a later registration with the same id replaces it
    pub fn with_model(mut self, config: ModelConfig, adapter: Arc<dyn ModelAdapter>) -> Self {
        self.models.retain(|m| m.config.model_id != config.model_id);
        self.models.push(ModelBinding { config, adapter });
        self
    }

    /// Fuse each item after a successful result
    pub fn with_fusion(mut self, engine: FusionEngine) -> Self {
        self.fusion = Some(engine);
        self
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_progress_interval(mut self, every: usize) -> Self {
        self.progress_interval = every;
        self
    }

    pub fn with_max_lock_wait_ms(mut self, ms: u64) -> Self {
        self.max_lock_wait_ms = ms;
        self
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.config.model_id.clone()).collect()
    }

    fn emit(&self, event: VigilEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }

    /// Run one model over its pending set
    ///
    /// # Errors
    /// Only fatal conditions: unknown model, zero concurrency, or a store
    /// failure. Per-item failures are reported in the [`BatchReport`].
    pub async fn run(
        &self,
        model_id: &str,
        concurrency: usize,
        filter: &WorkItemFilter,
    ) -> Result<BatchReport> {
        let binding = self
            .models
            .iter()
            .find(|m| m.config.model_id == model_id)
            .ok_or_else(|| Error::Config(format!("Unknown model: {}", model_id)))?;
        if concurrency == 0 {
            return Err(Error::Config("Concurrency limit must be at least 1".to_string()));
        }

        let pending = work_items::pending_work_items(&self.pool, model_id, filter).await?;
        let run_id = Uuid::new_v4();
        let total = pending.len();
        let mut report = BatchReport::new(run_id, model_id, total);
        let mut tracker = ProgressTracker::new(total, concurrency);

        info!(
            run_id = %run_id,
            model = %model_id,
            pending = total,
            concurrency,
            filtered = !filter.is_empty(),
            "Starting batch run"
        );
        self.emit(VigilEvent::BatchStarted {
            run_id,
            model_id: model_id.to_string(),
            pending: total,
            concurrency,
            timestamp: Utc::now(),
        });

        // Child token: a fatal error stops this run without cancelling the caller's token
        let run_token = self.cancel.child_token();

        let mut outcomes = stream::iter(pending)
            .map(|item| self.process_item(binding, item, &run_token))
            .buffer_unordered(concurrency);

        let mut fatal: Option<Error> = None;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(outcome) => self.collect(run_id, model_id, outcome, &mut report, &mut tracker),
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        model = %model_id,
                        error = %e,
                        "Store failure, aborting batch"
                    );
                    run_token.cancel();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                }
            }
        }
        drop(outcomes);

        if let Some(e) = fatal {
            return Err(e);
        }

        report.cancelled = self.cancel.is_cancelled();
        report.mean_latency_ms = tracker
            .mean_latency()
            .map(|d| d.as_secs_f64() * 1000.0)
            .unwrap_or(0.0);
        report.eta_seconds = tracker.eta_seconds();
        report.finish();

        info!(
            run_id = %run_id,
            model = %model_id,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            cancelled = report.cancelled,
            verdicts = report.verdicts_written,
            elapsed_s = report.elapsed_seconds(),
            "Batch run finished"
        );
        self.emit(VigilEvent::BatchCompleted {
            run_id,
            model_id: model_id.to_string(),
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
            cancelled: report.cancelled,
            elapsed_seconds: report.elapsed_seconds(),
            timestamp: Utc::now(),
        });

        Ok(report)
    }

    /// Run every registered model in registration order
    ///
    /// Stops early (returning the reports so far) if cancelled.
    pub async fn run_all(
        &self,
        concurrency: usize,
        filter: &WorkItemFilter,
    ) -> Result<Vec<BatchReport>> {
        let mut reports = Vec::with_capacity(self.models.len());
        for model_id in self.model_ids() {
            if self.cancel.is_cancelled() {
                break;
            }
            reports.push(self.run(&model_id, concurrency, filter).await?);
        }
        Ok(reports)
    }

    /// Fold one outcome into the report (collector side, single owner)
    fn collect(
        &self,
        run_id: Uuid,
        model_id: &str,
        outcome: ItemOutcome,
        report: &mut BatchReport,
        tracker: &mut ProgressTracker,
    ) {
        match outcome {
            ItemOutcome::Recorded {
                result,
                anomalies,
                verdict_written,
                latency,
            } => {
                report.anomalies += anomalies;
                if verdict_written {
                    report.verdicts_written += 1;
                }
                match result.status {
                    crate::models::ResultStatus::Success => report.succeeded += 1,
                    crate::models::ResultStatus::Failed => report.failed += 1,
                    crate::models::ResultStatus::Skipped => report.skipped += 1,
                }
                if let Some(err) = &result.error {
                    report.record_error(result.work_item_id, &err.kind, &err.detail);
                }
                tracker.record(latency);

                self.emit(VigilEvent::ItemCompleted {
                    run_id,
                    model_id: model_id.to_string(),
                    work_item_id: result.work_item_id,
                    status: result.status.to_string(),
                    concern_level: result.concern_level,
                    duration_ms: result.duration.as_millis() as u64,
                    timestamp: Utc::now(),
                });
            }
            ItemOutcome::AlreadySucceeded { work_item_id } => {
                debug!(item_id = work_item_id, model = %model_id, "Item already had a success");
                report.skipped += 1;
                tracker.record(None);
            }
            ItemOutcome::Cancelled { work_item_id } => {
                debug!(item_id = work_item_id, model = %model_id, "Item abandoned by cancellation");
                return;
            }
        }

        if tracker.should_report(self.progress_interval) {
            let eta = tracker.eta_seconds();
            info!(
                run_id = %run_id,
                model = %model_id,
                completed = tracker.completed(),
                total = tracker.total(),
                rate = format!("{:.2}/s", tracker.items_per_second()),
                eta = %format_eta(eta),
                "Batch progress"
            );
            self.emit(VigilEvent::BatchProgress {
                run_id,
                model_id: model_id.to_string(),
                completed: tracker.completed(),
                total: tracker.total(),
                succeeded: report.succeeded,
                failed: report.failed,
                skipped: report.skipped,
                items_per_second: tracker.items_per_second(),
                eta_seconds: eta,
                timestamp: Utc::now(),
            });
        }
    }

    /// Worker body for one work item
    async fn process_item(
        &self,
        binding: &ModelBinding,
        item: WorkItem,
        token: &CancellationToken,
    ) -> Result<ItemOutcome> {
        let config = &binding.config;
        let mut state = ItemModelState::Pending;

        if token.is_cancelled() {
            return Ok(ItemOutcome::Cancelled { work_item_id: item.id });
        }

        if !tokio::fs::try_exists(&item.artifact_path).await.unwrap_or(false) {
            warn!(
                item_id = item.id,
                model = %config.model_id,
                path = %item.artifact_path.display(),
                "Artifact missing, skipping"
            );
            let result = ModelResult::skipped(
                item.id,
                &config.model_id,
                "missing_artifact",
                format!("Artifact not found: {}", item.artifact_path.display()),
            );
            return self.persist(result, 0, None).await;
        }

        advance(&mut state, ItemModelState::InFlight, item.id);
        debug!(
            item_id = item.id,
            model = %config.model_id,
            file = %item.display_name(),
            "Worker starting item"
        );

        let started = Instant::now();
        let attempt = tokio::select! {
            _ = token.cancelled() => None,
            outcome = self.infer(binding, &item) => Some(outcome),
        };
        let Some((outcome, attempts)) = attempt else {
            advance(&mut state, ItemModelState::Pending, item.id);
            return Ok(ItemOutcome::Cancelled { work_item_id: item.id });
        };
        let latency = started.elapsed();

        let (result, anomalies) = match outcome {
            Ok(analysis) => {
                advance(&mut state, ItemModelState::Success, item.id);
                info!(
                    item_id = item.id,
                    model = %config.model_id,
                    concern = %analysis.judgment.concern_level,
                    confidence = analysis.judgment.confidence,
                    attempts,
                    duration_ms = latency.as_millis() as u64,
                    "Inference succeeded"
                );
                let anomalies = analysis.anomalies.len();
                let result = ModelResult::success(
                    item.id,
                    &config.model_id,
                    analysis.judgment,
                    latency,
                    attempts,
                );
                (result, anomalies)
            }
            Err(err) => {
                advance(&mut state, ItemModelState::Failed, item.id);
                warn!(
                    item_id = item.id,
                    model = %config.model_id,
                    error_kind = err.kind(),
                    attempts,
                    "Inference failed: {}",
                    err
                );
                let error = ResultError {
                    kind: err.kind().to_string(),
                    detail: err.to_string(),
                    raw_output: err.raw_output().map(str::to_string),
                };
                (
                    ModelResult::failed(item.id, &config.model_id, error, latency, attempts),
                    0,
                )
            }
        };

        self.persist(result, anomalies, Some(latency)).await
    }

    /// Preprocess and call the adapter under the retry policy
    ///
    /// Each attempt prepares the artifact (a cache hit after the first
    /// success), waits for an adapter permit, then runs the timed inference.
    /// Preprocessing failures are classified like adapter failures, so a
    /// transient cache I/O error is retried with backoff.
    async fn infer(
        &self,
        binding: &ModelBinding,
        item: &WorkItem,
    ) -> (std::result::Result<crate::adapters::Analysis, AdapterError>, u32) {
        let adapter = binding.adapter.as_ref();
        let config = &binding.config;
        let cache = self.cache.as_ref();
        let source = item.artifact_path.as_path();
        let label = format!("{} item {}", config.model_id, item.id);

        let outcome = self
            .retry
            .execute(&label, move |_| async move {
                let artifact = cache.prepare(source).await.map_err(AdapterError::from)?;
                adapter.acquire_permit().await;
                let inference = adapter.analyze(&artifact, config);
                match tokio::time::timeout(config.timeout, inference).await {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::Transient(format!(
                        "Timed out after {}s",
                        config.timeout.as_secs_f64()
                    ))),
                }
            })
            .await;

        (outcome.result, outcome.attempts)
    }

    /// Write a result, then fuse on success
    async fn persist(
        &self,
        result: ModelResult,
        anomalies: usize,
        latency: Option<Duration>,
    ) -> Result<ItemOutcome> {
        let pool = &self.pool;
        let result_ref = &result;
        let outcome = retry_on_lock("insert model result", self.max_lock_wait_ms, move || {
            model_results::insert_result(pool, result_ref)
        })
        .await?;

        if outcome == InsertOutcome::AlreadySucceeded {
            return Ok(ItemOutcome::AlreadySucceeded {
                work_item_id: result.work_item_id,
            });
        }

        let mut verdict_written = false;
        if result.is_success() {
            if let Some(engine) = &self.fusion {
                verdict_written = engine.try_fuse(result.work_item_id).await?.is_some();
            }
        }

        Ok(ItemOutcome::Recorded {
            result,
            anomalies,
            verdict_written,
            latency,
        })
    }
}

fn advance(state: &mut ItemModelState, next: ItemModelState, work_item_id: i64) {
    if !state.can_transition_to(next) {
        warn!(
            item_id = work_item_id,
            from = ?state,
            to = ?next,
            "Unexpected item state transition"
        );
    }
    *state = next;
}
