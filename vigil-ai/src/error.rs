//! Error types for vigil-ai
//!
//! Item-scoped errors (`AdapterError`, `CacheError`, `FusionError` other than
//! `Store`) never abort a batch. Store errors (`vigil_common::Error`) are fatal
//! to a batch run.

use thiserror::Error;

/// Model adapter failure taxonomy
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    /// Network failure, timeout or backend overload; retried with backoff
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Malformed or unsupported input, unknown model; never retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Raw model output could not be mapped onto the judgment schema
    #[error("Parse error: {message}")]
    Parse { message: String, raw_output: String },
}

impl AdapterError {
    /// Short class name, persisted as `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            AdapterError::Transient(_) => "transient",
            AdapterError::Permanent(_) => "permanent",
            AdapterError::Parse { .. } => "parse",
        }
    }

    pub fn raw_output(&self) -> Option<&str> {
        match self {
            AdapterError::Parse { raw_output, .. } => Some(raw_output),
            _ => None,
        }
    }

    pub fn parse(message: impl Into<String>, raw_output: impl Into<String>) -> Self {
        AdapterError::Parse {
            message: message.into(),
            raw_output: raw_output.into(),
        }
    }
}

impl From<CacheError> for AdapterError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Io(e) => AdapterError::Transient(format!("Preprocessing I/O: {}", e)),
            other => AdapterError::Permanent(other.to_string()),
        }
    }
}

/// Preprocessing cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transform ran but failed (decode/encode)
    #[error("Transform failed: {0}")]
    Transform(String),

    /// Artifact content is not something the transform understands
    #[error("Unsupported artifact: {0}")]
    UnsupportedArtifact(String),
}

/// Ensemble fusion errors
#[derive(Debug, Error)]
pub enum FusionError {
    /// No success results to fuse; no verdict is written
    #[error("Insufficient evidence for work item {work_item_id}")]
    InsufficientEvidence { work_item_id: i64 },

    /// Fewer contributing models than the configured quorum
    #[error("Quorum not met: have {have} of {need} required models")]
    QuorumNotMet { have: usize, need: usize },

    #[error(transparent)]
    Store(#[from] vigil_common::Error),
}

impl FusionError {
    /// Expected "not yet" outcomes, as opposed to store failures
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            FusionError::InsufficientEvidence { .. } | FusionError::QuorumNotMet { .. }
        )
    }
}
