//! Command-line interface
//!
//! Argument definitions plus the command handlers. Handlers return
//! `vigil_common::Result`; only fatal conditions (store failure, bad
//! configuration) are errors. Per-item failures show up in the printed
//! batch report and do not change the exit status.

use crate::adapters::{ModelAdapter, ModelConfig, OllamaAdapter, RetryPolicy};
use crate::cache::{ImageStandardizer, PreprocessingCache};
use crate::config::VigilConfig;
use crate::db::{model_results, verdicts};
use crate::error::FusionError;
use crate::fusion::{FuseAllSummary, FusionEngine, FusionPolicy};
use crate::ingest;
use crate::models::BatchReport;
use crate::scheduler::{BatchScheduler, WorkItemFilter};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_common::events::EventBus;
use vigil_common::{Error, Result};

#[derive(Parser, Debug)]
#[command(name = "vigil-ai")]
#[command(about = "Resumable multi-model image analysis with ensemble fusion")]
#[command(version)]
pub struct Cli {
    /// Configuration file (overrides VIGIL_CONFIG and the default location)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one model over its pending work items
    Run {
        #[arg(long)]
        model: String,
        #[command(flatten)]
        options: RunOptions,
    },
    /// Run every configured model in order
    RunAll {
        #[command(flatten)]
        options: RunOptions,
    },
    /// Fuse one item, or every item with at least one success
    Fuse {
        #[arg(long)]
        item: Option<i64>,
    },
    /// Per-model coverage and fusion counts
    Status,
    /// Verdicts in review priority order
    Review {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only verdicts flagged for human review
        #[arg(long)]
        flagged: bool,
    },
    /// Register image files under DIR as work items
    Ingest {
        dir: PathBuf,
        /// Free-form provenance recorded on new items
        #[arg(long)]
        source: Option<String>,
    },
    /// Verify the backend serves every configured model
    Check,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Worker pool size (default from [scheduler] concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,
    #[arg(long)]
    pub limit: Option<usize>,
    /// Comma-separated work item ids
    #[arg(long, value_delimiter = ',')]
    pub ids: Option<Vec<i64>>,
    #[arg(long)]
    pub path_contains: Option<String>,
    /// Only items created at or after this RFC 3339 timestamp
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,
    /// Leave items whose last attempt failed for a later run
    #[arg(long)]
    pub skip_failed: bool,
    #[arg(long)]
    pub max_attempts: Option<u32>,
    #[arg(long)]
    pub base_delay_ms: Option<u64>,
    /// Do not fuse items as results arrive
    #[arg(long)]
    pub no_fuse: bool,
}

impl RunOptions {
    pub fn filter(&self) -> WorkItemFilter {
        WorkItemFilter {
            ids: self.ids.clone(),
            path_contains: self.path_contains.clone(),
            created_after: self.since,
            skip_failed: self.skip_failed,
            limit: self.limit,
        }
    }

    /// Configured retry policy with CLI overrides applied
    pub fn retry_policy(&self, base: &RetryPolicy) -> Result<RetryPolicy> {
        let mut policy = base.clone();
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n;
        }
        if let Some(ms) = self.base_delay_ms {
            policy.base_delay_ms = ms;
        }
        policy.validate()?;
        Ok(policy)
    }
}

/// Everything a command needs, resolved once from configuration
pub struct Context {
    pub config: VigilConfig,
    /// Directory relative prompt files resolve against
    pub config_dir: Option<PathBuf>,
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub cancel: CancellationToken,
}

impl Context {
    pub async fn open(
        config: VigilConfig,
        config_path: Option<&Path>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(path = %db_path.display(), "Opening work item store");
        let pool = vigil_common::db::init_database(&db_path).await?;

        Ok(Self {
            config,
            config_dir: config_path.and_then(Path::parent).map(Path::to_path_buf),
            pool,
            event_bus: EventBus::new(256),
            cancel,
        })
    }

    pub fn fusion_engine(&self) -> FusionEngine {
        let policy = FusionPolicy::new(self.config.required_models(), &self.config.fusion);
        FusionEngine::new(self.pool.clone(), policy)
            .with_event_bus(self.event_bus.clone())
            .with_max_lock_wait_ms(self.config.scheduler.max_lock_wait_ms)
    }

    pub fn model_configs(&self) -> Result<Vec<ModelConfig>> {
        self.config
            .models
            .iter()
            .map(|entry| entry.resolve(self.config_dir.as_deref()))
            .collect()
    }

    fn adapter_for(&self, model: &ModelConfig) -> Result<Arc<dyn ModelAdapter>> {
        let adapter = OllamaAdapter::new(self.config.backend.host.clone())?
            .with_rate_limit(model.requests_per_second);
        Ok(Arc::new(adapter))
    }

    pub fn scheduler(&self, options: &RunOptions) -> Result<BatchScheduler> {
        let transform =
            ImageStandardizer::new(self.config.cache.max_size, self.config.cache.jpeg_quality);
        let cache = Arc::new(PreprocessingCache::new(self.config.cache_dir(), Arc::new(transform)));
        let retry = options.retry_policy(&self.config.retry)?;

        let mut scheduler = BatchScheduler::new(self.pool.clone(), cache, retry)
            .with_event_bus(self.event_bus.clone())
            .with_cancellation(self.cancel.clone())
            .with_progress_interval(self.config.scheduler.progress_interval)
            .with_max_lock_wait_ms(self.config.scheduler.max_lock_wait_ms);

        for model in self.model_configs()? {
            let adapter = self.adapter_for(&model)?;
            scheduler = scheduler.with_model(model, adapter);
        }
        if !options.no_fuse {
            scheduler = scheduler.with_fusion(self.fusion_engine());
        }
        Ok(scheduler)
    }

    fn concurrency(&self, options: &RunOptions) -> usize {
        options.concurrency.unwrap_or(self.config.scheduler.concurrency)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fusion_line(summary: &FuseAllSummary) -> String {
    format!(
        "Fusion: {} candidates, {} fused, {} re-fused, {} unchanged, {} incomplete",
        summary.candidates, summary.fused, summary.refused, summary.unchanged, summary.incomplete
    )
}

fn print_reports(reports: &[BatchReport], json: bool) -> Result<()> {
    if json {
        return print_json(&reports);
    }
    for report in reports {
        println!("{}", report.summary());
    }
    Ok(())
}

/// Execute one parsed command
pub async fn dispatch(command: Command, ctx: &Context, json: bool) -> Result<()> {
    match command {
        Command::Run { model, options } => {
            if ctx.config.model(&model).is_none() {
                return Err(Error::Config(format!("Unknown model: {}", model)));
            }
            let scheduler = ctx.scheduler(&options)?;
            let report = scheduler.run(&model, ctx.concurrency(&options), &options.filter()).await?;
            print_reports(std::slice::from_ref(&report), json)
        }

        Command::RunAll { options } => {
            let scheduler = ctx.scheduler(&options)?;
            let reports = scheduler.run_all(ctx.concurrency(&options), &options.filter()).await?;
            print_reports(&reports, json)?;
            if !ctx.cancel.is_cancelled() {
                // Catch items whose quorum completed in an earlier run
                let summary = ctx.fusion_engine().fuse_all().await?;
                if json {
                    print_json(&summary)?;
                } else {
                    println!("{}", fusion_line(&summary));
                }
            }
            Ok(())
        }

        Command::Fuse { item: Some(id) } => match ctx.fusion_engine().fuse(id).await {
            Ok(stored) => {
                if json {
                    return print_json(&stored);
                }
                println!(
                    "Item {}: {} (confidence {:.2}, agreement {}, models {}){}",
                    id,
                    stored.verdict.concern_level,
                    stored.verdict.confidence,
                    stored.verdict.agreement,
                    stored.verdict.contributing_models.join(","),
                    if stored.verdict.flagged_for_review { " [review]" } else { "" }
                );
                Ok(())
            }
            Err(FusionError::Store(e)) => Err(e),
            Err(e) => {
                warn!(item_id = id, "Item not fused: {}", e);
                println!("Item {} not fused: {}", id, e);
                Ok(())
            }
        },

        Command::Fuse { item: None } => {
            let summary = ctx.fusion_engine().fuse_all().await?;
            if json {
                return print_json(&summary);
            }
            println!("{}", fusion_line(&summary));
            Ok(())
        }

        Command::Status => {
            let mut coverage = Vec::with_capacity(ctx.config.models.len());
            for entry in &ctx.config.models {
                coverage.push(model_results::model_coverage(&ctx.pool, &entry.id).await?);
            }
            let fusion = verdicts::fusion_coverage(&ctx.pool).await?;

            if json {
                #[derive(Serialize)]
                struct StatusOut<'a> {
                    models: &'a [model_results::ModelCoverage],
                    fusion: verdicts::FusionCoverage,
                }
                return print_json(&StatusOut {
                    models: &coverage,
                    fusion,
                });
            }

            println!(
                "{:<16} {:>8} {:>8} {:>8} {:>8} {:>8}",
                "model", "items", "success", "failed", "skipped", "pending"
            );
            for c in &coverage {
                println!(
                    "{:<16} {:>8} {:>8} {:>8} {:>8} {:>8}",
                    c.model_id, c.total_items, c.success, c.failed, c.skipped, c.pending
                );
            }
            println!(
                "verdicts: {} fused, {} re-fused, {} incomplete, {} flagged for review",
                fusion.fused, fusion.refused, fusion.incomplete, fusion.flagged
            );
            Ok(())
        }

        Command::Review { limit, flagged } => {
            let list = verdicts::priority_list(&ctx.pool, Some(limit), flagged).await?;
            if json {
                return print_json(&list);
            }
            if list.is_empty() {
                println!("No verdicts");
            }
            for (rank, stored) in list.iter().enumerate() {
                let v = &stored.verdict;
                println!(
                    "{:>3}. item {:<6} {:<8} conf {:.2}  agreement {:<8} score {:.2}{}{}",
                    rank + 1,
                    v.work_item_id,
                    v.concern_level,
                    v.confidence,
                    v.agreement,
                    v.priority_score,
                    if v.low_confidence { "  [partial]" } else { "" },
                    if v.flagged_for_review { "  [review]" } else { "" }
                );
                if !v.indicators.is_empty() {
                    println!("       indicators: {}", v.indicators.join(", "));
                }
            }
            Ok(())
        }

        Command::Ingest { dir, source } => {
            let summary = ingest::ingest_directory(&ctx.pool, &dir, source.as_deref()).await?;
            if json {
                return print_json(&summary);
            }
            println!(
                "Discovered {} images: {} registered, {} already known",
                summary.discovered, summary.registered, summary.already_known
            );
            Ok(())
        }

        Command::Check => {
            let models = ctx.model_configs()?;
            let mut unavailable = 0usize;
            for model in &models {
                let adapter = ctx.adapter_for(model)?;
                match adapter.health_check(model).await {
                    Ok(()) => println!("{:<16} {:<24} ok", model.model_id, model.backend_model),
                    Err(e) => {
                        unavailable += 1;
                        println!(
                            "{:<16} {:<24} unavailable: {}",
                            model.model_id, model.backend_model, e
                        );
                    }
                }
            }
            if unavailable > 0 {
                return Err(Error::Config(format!(
                    "{} of {} models unavailable at {}",
                    unavailable,
                    models.len(),
                    ctx.config.backend.host
                )));
            }
            Ok(())
        }
    }
}
