//! Test Helper Utilities
//!
//! Shared utilities for vigil-ai integration tests

#![allow(dead_code)]

pub mod db_utils;
pub mod image_fixtures;
pub mod scripted_adapter;

pub use db_utils::{create_test_db, seed_work_items, test_cache};
pub use image_fixtures::write_test_png;
pub use scripted_adapter::{Script, ScriptedAdapter};
