//! Work items: one analyzable artifact each
//!
//! Work items are created by the ingestion side and are read-only to the
//! orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One analyzable artifact (captured image, screenshot)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Stable store identifier
    pub id: i64,
    /// Location of the artifact content
    pub artifact_path: PathBuf,
    /// Opaque reference back to the ingestion record (e.g. search result id)
    pub source_ref: Option<String>,
    /// When the ingestion side registered the item
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    /// File name for log lines
    pub fn display_name(&self) -> String {
        self.artifact_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.artifact_path.display().to_string())
    }
}
