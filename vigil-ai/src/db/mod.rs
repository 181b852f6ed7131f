//! Work item store access for vigil-ai
//!
//! Schema lives in `vigil_common::db`; this module holds the orchestrator's
//! queries. Writers are expected to go through `utils::retry_on_lock`.

pub mod model_results;
pub mod verdicts;
pub mod work_items;

use chrono::{DateTime, SecondsFormat, Utc};
use vigil_common::Result;

/// Canonical stored timestamp format (UTC, millisecond precision, `Z` suffix)
///
/// Fixed width so text comparison in SQL orders chronologically.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

/// Serialize a tag list for a JSON text column
pub(crate) fn encode_tags(tags: &[String]) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

pub(crate) fn decode_tags(json: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(json)?)
}
