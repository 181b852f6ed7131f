//! # Vigil Common Library
//!
//! Shared code for the vigil analysis tools including:
//! - Database pool initialization and core schema
//! - Concern level vocabulary shared with reporting tools
//! - Event types (VigilEvent enum) and the progress EventBus
//! - Configuration file resolution
//! - Human-readable duration formatting

pub mod concern;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod human_time;

pub use concern::ConcernLevel;
pub use error::{Error, Result};
