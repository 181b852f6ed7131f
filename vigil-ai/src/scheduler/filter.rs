//! Pending-set narrowing
//!
//! A filter only ever narrows the pending set; it can never add items that
//! already have a successful result for the model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite};

/// Optional restrictions applied on top of the pending-set query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItemFilter {
    /// Only these work item ids
    pub ids: Option<Vec<i64>>,
    /// Artifact path must contain this substring
    pub path_contains: Option<String>,
    /// Only items registered at or after this instant
    pub created_after: Option<DateTime<Utc>>,
    /// Exclude items whose authoritative result for the model is `failed`
    pub skip_failed: bool,
    /// Cap the number of items dispatched
    pub limit: Option<usize>,
}

impl WorkItemFilter {
    pub fn ids(ids: Vec<i64>) -> Self {
        Self {
            ids: Some(ids),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == WorkItemFilter::default()
    }

    /// Append `AND ...` predicates over the `w` (work_items) alias
    pub(crate) fn push_predicates<'a>(
        &'a self,
        qb: &mut QueryBuilder<'a, Sqlite>,
        model_id: &'a str,
    ) {
        if let Some(ids) = &self.ids {
            if ids.is_empty() {
                qb.push(" AND 0");
            } else {
                qb.push(" AND w.id IN (");
                let mut separated = qb.separated(", ");
                for id in ids {
                    separated.push_bind(*id);
                }
                separated.push_unseparated(")");
            }
        }

        if let Some(fragment) = &self.path_contains {
            qb.push(" AND instr(w.artifact_path, ").push_bind(fragment.as_str()).push(") > 0");
        }

        if let Some(since) = &self.created_after {
            qb.push(" AND w.created_at >= ").push_bind(crate::db::format_timestamp(since));
        }

        if self.skip_failed {
            qb.push(
                " AND NOT EXISTS (SELECT 1 FROM model_results f \
                 WHERE f.work_item_id = w.id AND f.superseded = 0 \
                 AND f.status = 'failed' AND f.model_id = ",
            )
            .push_bind(model_id)
            .push(")");
        }
    }

    pub(crate) fn push_limit(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(limit) = self.limit {
            qb.push(" LIMIT ").push_bind(limit as i64);
        }
    }
}
