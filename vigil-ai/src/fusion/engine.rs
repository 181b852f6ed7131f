//! Store-backed fusion
//!
//! Loads the authoritative results for an item, runs [`fuse_results`], and
//! upserts the verdict. Re-fusing over unchanged evidence rewrites the row
//! without counting as a re-fusion. Incomplete items (no evidence, quorum
//! not met) are left untouched: an existing verdict is never removed or
//! rewritten by a fusion that could not run.

use crate::db::model_results;
use crate::db::verdicts::{self, VerdictWrite};
use crate::error::FusionError;
use crate::fusion::{fuse_results, FusionPolicy};
use crate::models::{StoredVerdict, VerdictChange};
use crate::utils::retry_on_lock;
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};
use vigil_common::events::{EventBus, VigilEvent};
use vigil_common::Result;

/// Outcome counts of [`FusionEngine::fuse_all`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FuseAllSummary {
    pub candidates: usize,
    /// First verdict written
    pub fused: usize,
    /// Verdict recomputed over new evidence
    pub refused: usize,
    /// Verdict already reflected the current evidence
    pub unchanged: usize,
    pub incomplete: usize,
}

#[derive(Clone)]
pub struct FusionEngine {
    pool: SqlitePool,
    policy: FusionPolicy,
    event_bus: Option<EventBus>,
    max_lock_wait_ms: u64,
}

impl FusionEngine {
    pub fn new(pool: SqlitePool, policy: FusionPolicy) -> Self {
        Self {
            pool,
            policy,
            event_bus: None,
            max_lock_wait_ms: crate::utils::db_retry::DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_max_lock_wait_ms(mut self, ms: u64) -> Self {
        self.max_lock_wait_ms = ms;
        self
    }

    pub fn policy(&self) -> &FusionPolicy {
        &self.policy
    }

    /// Fuse one work item and persist the verdict
    pub async fn fuse(&self, work_item_id: i64) -> std::result::Result<StoredVerdict, FusionError> {
        self.fuse_and_write(work_item_id).await.map(|write| write.stored)
    }

    async fn fuse_and_write(
        &self,
        work_item_id: i64,
    ) -> std::result::Result<VerdictWrite, FusionError> {
        let results = model_results::load_results_for_item(&self.pool, work_item_id).await?;
        let verdict = fuse_results(work_item_id, &results, &self.policy)?;

        let pool = &self.pool;
        let verdict = &verdict;
        let write = retry_on_lock("upsert ensemble verdict", self.max_lock_wait_ms, move || {
            verdicts::upsert_verdict(pool, verdict)
        })
        .await?;

        let stored = &write.stored;
        if write.change == VerdictChange::Unchanged {
            debug!(
                item_id = work_item_id,
                fusion_count = stored.fusion_count,
                "Verdict already reflects current evidence"
            );
            return Ok(write);
        }

        info!(
            item_id = work_item_id,
            concern = %stored.verdict.concern_level,
            confidence = stored.verdict.confidence,
            agreement = %stored.verdict.agreement,
            models = stored.verdict.contributing_count(),
            low_confidence = stored.verdict.low_confidence,
            fusion_count = stored.fusion_count,
            "Ensemble verdict written"
        );

        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(VigilEvent::VerdictUpdated {
                work_item_id,
                concern_level: stored.verdict.concern_level,
                confidence: stored.verdict.confidence,
                fusion_count: stored.fusion_count,
                timestamp: Utc::now(),
            });
        }

        Ok(write)
    }

    /// Fuse if possible; `Ok(None)` when the item is still incomplete
    ///
    /// Only store failures are returned as errors.
    pub async fn try_fuse(&self, work_item_id: i64) -> Result<Option<StoredVerdict>> {
        Ok(self.try_fuse_and_write(work_item_id).await?.map(|write| write.stored))
    }

    async fn try_fuse_and_write(&self, work_item_id: i64) -> Result<Option<VerdictWrite>> {
        match self.fuse_and_write(work_item_id).await {
            Ok(write) => Ok(Some(write)),
            Err(FusionError::Store(e)) => Err(e),
            Err(e) => {
                debug!(item_id = work_item_id, reason = %e, "Item not fused");
                Ok(None)
            }
        }
    }

    /// Re-fuse every item with at least one successful result
    pub async fn fuse_all(&self) -> Result<FuseAllSummary> {
        let candidates = model_results::fusion_candidates(&self.pool).await?;
        let mut summary = FuseAllSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        for item_id in candidates {
            match self.try_fuse_and_write(item_id).await?.map(|write| write.change) {
                Some(VerdictChange::Created) => summary.fused += 1,
                Some(VerdictChange::Refused) => summary.refused += 1,
                Some(VerdictChange::Unchanged) => summary.unchanged += 1,
                None => summary.incomplete += 1,
            }
        }

        info!(
            candidates = summary.candidates,
            fused = summary.fused,
            refused = summary.refused,
            unchanged = summary.unchanged,
            incomplete = summary.incomplete,
            "Fusion pass complete"
        );
        Ok(summary)
    }
}
