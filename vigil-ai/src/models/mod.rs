//! Data models for vigil-ai
//!
//! - Work items and per-model results
//! - Ensemble verdicts and fusion state
//! - Batch run reports

pub mod batch_report;
pub mod model_result;
pub mod verdict;
pub mod work_item;

pub use batch_report::{BatchReport, ErrorSample};
pub use model_result::{ItemModelState, ModelJudgment, ModelResult, ResultError, ResultStatus};
pub use verdict::{AgreementLevel, EnsembleVerdict, ItemFusionState, StoredVerdict, VerdictChange};
pub use work_item::WorkItem;
