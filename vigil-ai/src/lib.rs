//! vigil-ai library interface
//!
//! Resumable multi-model analysis of image artifacts:
//! - [`scheduler`] works out which items still need which model and drives
//!   bounded-concurrency batches against [`adapters`]
//! - [`cache`] standardizes each artifact once, shared by every model
//! - [`fusion`] combines per-model judgments into one ensemble verdict
//!
//! All progress lives in the SQLite work item store ([`db`]), so any run can
//! be interrupted and resumed without repeating completed inference.

pub mod adapters;
pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod fusion;
pub mod ingest;
pub mod models;
pub mod scheduler;
pub mod utils;

pub use crate::error::{AdapterError, CacheError, FusionError};
