//! Strict judgment schema
//!
//! Maps a model's raw text output onto [`ModelJudgment`]. Fails closed: a
//! missing or unknown concern level, or any known field present with the
//! wrong JSON type, is a `ParseError`. Repairable data problems (confidence
//! out of range, junk entries inside an indicator list) are fixed and
//! reported as [`Anomaly`] values.

use crate::adapters::Analysis;
use crate::error::AdapterError;
use crate::models::ModelJudgment;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;
use vigil_common::ConcernLevel;

/// Prompt used when a model entry configures none
pub const DEFAULT_PROMPT: &str = include_str!("default_prompt.txt");

/// Fields whose entries are merged into the indicator set, in output order
pub const INDICATOR_FIELDS: [&str; 8] = [
    "concern_indicators",
    "restriction_indicators",
    "safety_concerns",
    "living_condition_issues",
    "health_concerns",
    "exploitation_indicators",
    "control_indicators",
    "welfare_concerns",
];

const DESCRIPTION_FIELDS: [&str; 2] = ["scene_description", "description"];
const CONFIDENCE_FIELDS: [&str; 2] = ["confidence_score", "confidence"];

/// Data-quality problem repaired while mapping model output
#[derive(Debug, Clone, PartialEq)]
pub enum Anomaly {
    /// Reported confidence outside [0, 1]; clamped
    ConfidenceOutOfRange { value: f64 },
    /// Non-string entry inside an indicator list; dropped
    MalformedIndicator { field: String },
    /// Blank entry inside an indicator list; dropped
    EmptyIndicator { field: String },
}

impl Anomaly {
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::ConfidenceOutOfRange { .. } => "confidence_out_of_range",
            Anomaly::MalformedIndicator { .. } => "malformed_indicator",
            Anomaly::EmptyIndicator { .. } => "empty_indicator",
        }
    }
}

/// Parser from raw model text to [`ModelJudgment`]
#[derive(Debug, Clone, Default)]
pub struct JudgmentSchema {
    /// Truncate descriptions to this many characters
    pub max_description_chars: Option<usize>,
}

impl JudgmentSchema {
    pub fn new(max_description_chars: Option<usize>) -> Self {
        Self { max_description_chars }
    }

    /// Map raw output onto the schema
    pub fn parse(&self, raw: &str) -> Result<Analysis, AdapterError> {
        let json = extract_json_object(raw)
            .ok_or_else(|| AdapterError::parse("No JSON object in model output", raw))?;

        let value: Value = serde_json::from_str(json)
            .map_err(|e| AdapterError::parse(format!("Invalid JSON: {}", e), raw))?;
        let object = value
            .as_object()
            .ok_or_else(|| AdapterError::parse("Model output is not a JSON object", raw))?;

        self.map_object(object).map_err(|message| AdapterError::parse(message, raw))
    }

    fn map_object(&self, object: &Map<String, Value>) -> Result<Analysis, String> {
        let mut anomalies = Vec::new();

        let concern_label = match object.get("concern_level") {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(format!("concern_level has wrong type: {}", type_name(other)))
            }
            None => return Err("concern_level missing".to_string()),
        };
        let concern_level = ConcernLevel::from_model_label(concern_label)
            .ok_or_else(|| format!("Unknown concern_level: {:?}", concern_label))?;

        let mut description = first_string(object, &DESCRIPTION_FIELDS)?.unwrap_or_default();
        if let Some(max) = self.max_description_chars {
            if description.chars().count() > max {
                description = description.chars().take(max).collect();
            }
        }

        let activity = first_string(object, &["activity_description"])?.unwrap_or_default();

        let personnel_count = match object.get("personnel_count") {
            None | Some(Value::Null) => 0.0,
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            Some(other) => {
                return Err(format!("personnel_count has wrong type: {}", type_name(other)))
            }
        };

        let mut indicators = Vec::new();
        let mut seen = HashSet::new();
        for field in INDICATOR_FIELDS {
            for tag in indicator_entries(object, field, &mut anomalies)? {
                if seen.insert(tag.to_lowercase()) {
                    indicators.push(tag);
                }
            }
        }

        let reported = match first_number(object, &CONFIDENCE_FIELDS)? {
            Some(value) if value > 1.0 || value < 0.0 => {
                anomalies.push(Anomaly::ConfidenceOutOfRange { value });
                Some(value.clamp(0.0, 1.0))
            }
            other => other,
        };

        // Zero or absent confidence: derive from how complete the answer is
        let confidence = match reported {
            Some(value) if value > 0.0 => value,
            _ => derived_confidence(
                &description,
                &activity,
                personnel_count,
                !indicators.is_empty(),
                concern_level,
            ),
        };

        for anomaly in &anomalies {
            warn!(anomaly = anomaly.kind(), detail = ?anomaly, "Repaired model output");
        }

        Ok(Analysis {
            judgment: ModelJudgment {
                description,
                concern_level,
                indicators,
                confidence,
            },
            anomalies,
        })
    }
}

/// Confidence for answers that report none, from response completeness
pub fn derived_confidence(
    description: &str,
    activity: &str,
    personnel_count: f64,
    has_indicators: bool,
    concern_level: ConcernLevel,
) -> f64 {
    let mut score = 0.3;
    if !description.is_empty() {
        score += 0.2;
    }
    if !activity.is_empty() {
        score += 0.15;
    }
    if personnel_count > 0.0 {
        score += 0.1;
    }
    if has_indicators {
        score += 0.15;
    }
    if concern_level > ConcernLevel::Low {
        score += 0.1;
    }
    f64::min(0.95, score)
}

/// Locate the first complete JSON object in raw output, tolerating Markdown
/// fences and surrounding prose
///
/// Braces inside string literals do not count toward nesting. An object that
/// never closes yields `None`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let body = if let Some(start) = text.find("```json") {
        let rest = &text[start + "```json".len()..];
        rest.find("```").map(|end| &rest[..end]).unwrap_or(rest)
    } else if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        rest.find("```").map(|end| &rest[..end]).unwrap_or(rest)
    } else {
        text
    };

    let open = body.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in body[open..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[open..=open + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Result<Option<String>, String> {
    for key in keys {
        match object.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return Ok(Some(s.trim().to_string())),
            Some(other) => return Err(format!("{} has wrong type: {}", key, type_name(other))),
        }
    }
    Ok(None)
}

fn first_number(object: &Map<String, Value>, keys: &[&str]) -> Result<Option<f64>, String> {
    for key in keys {
        match object.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::Number(n)) => return Ok(n.as_f64()),
            Some(other) => return Err(format!("{} has wrong type: {}", key, type_name(other))),
        }
    }
    Ok(None)
}

/// Entries of one indicator field: an array of strings or a comma-separated string
fn indicator_entries(
    object: &Map<String, Value>,
    field: &str,
    anomalies: &mut Vec<Anomaly>,
) -> Result<Vec<String>, String> {
    let raw: Vec<Option<String>> = match object.get(field) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) => s.split(',').map(|part| Some(part.to_string())).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Some(s.clone()),
                _ => None,
            })
            .collect(),
        Some(other) => return Err(format!("{} has wrong type: {}", field, type_name(other))),
    };

    let mut entries = Vec::new();
    for entry in raw {
        match entry {
            None => anomalies.push(Anomaly::MalformedIndicator {
                field: field.to_string(),
            }),
            Some(s) if s.trim().is_empty() => anomalies.push(Anomaly::EmptyIndicator {
                field: field.to_string(),
            }),
            Some(s) => entries.push(s.trim().to_string()),
        }
    }

    // A bare comma-separated string commonly ends with a trailing comma
    if matches!(object.get(field), Some(Value::String(_))) {
        anomalies.retain(|a| !matches!(a, Anomaly::EmptyIndicator { field: f } if f == field));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Analysis, AdapterError> {
        JudgmentSchema::default().parse(raw)
    }

    #[test]
    fn test_full_response() {
        let raw = r#"{
            "scene_description": "Workers on a scaffold without harnesses",
            "concern_level": "HIGH",
            "concern_indicators": ["no-safety-gear", "Overcrowding"],
            "safety_concerns": ["no-safety-gear", "fall risk"],
            "confidence_score": 0.82
        }"#;

        let analysis = parse(raw).unwrap();
        let judgment = analysis.judgment;
        assert_eq!(judgment.concern_level, ConcernLevel::High);
        assert_eq!(judgment.confidence, 0.82);
        assert_eq!(judgment.indicators, vec!["no-safety-gear", "Overcrowding", "fall risk"]);
        assert!(analysis.anomalies.is_empty());
    }

    #[test]
    fn test_fenced_json_with_prose() {
        let raw = concat!(
            "Here is my analysis:\n```json\n",
            r#"{"description": "Empty yard", "concern_level": "minimal", "confidence": 0.9}"#,
            "\n```\nLet me know."
        );
        let judgment = parse(raw).unwrap().judgment;
        assert_eq!(judgment.concern_level, ConcernLevel::Low);
        assert_eq!(judgment.description, "Empty yard");
    }

    #[test]
    fn test_alias_vocabulary() {
        for (label, level) in [
            ("moderate", ConcernLevel::Medium),
            ("Severe", ConcernLevel::High),
            ("extreme", ConcernLevel::Critical),
            ("none", ConcernLevel::None),
        ] {
            let raw = format!(r#"{{"concern_level": "{}", "confidence": 0.5}}"#, label);
            assert_eq!(parse(&raw).unwrap().judgment.concern_level, level);
        }
    }

    #[test]
    fn test_fails_closed() {
        // No JSON at all; raw output preserved
        let err = parse("I cannot analyze this image.").unwrap_err();
        assert_eq!(err.raw_output(), Some("I cannot analyze this image."));

        // Missing concern level
        assert!(parse(r#"{"description": "x"}"#).is_err());
        // Unknown concern level
        assert!(parse(r#"{"concern_level": "spicy"}"#).is_err());
        // Wrong types on known fields
        assert!(parse(r#"{"concern_level": 3}"#).is_err());
        assert!(parse(r#"{"concern_level": "low", "confidence": "high"}"#).is_err());
        assert!(parse(r#"{"concern_level": "low", "safety_concerns": 4}"#).is_err());
        assert!(parse(r#"{"concern_level": "low", "description": ["a"]}"#).is_err());
        // Top-level array
        assert!(parse(r#"[{"concern_level": "low"}]"#).is_err());
    }

    #[test]
    fn test_confidence_clamped_with_anomaly() {
        let analysis = parse(r#"{"concern_level": "low", "confidence": 1.7}"#).unwrap();
        assert_eq!(analysis.judgment.confidence, 1.0);
        assert_eq!(analysis.anomalies, vec![Anomaly::ConfidenceOutOfRange { value: 1.7 }]);

        let raw = r#"{"concern_level": "low", "scene_description": "yard", "confidence": -0.2}"#;
        let analysis = parse(raw).unwrap();
        // Clamped to zero, then treated as unreported
        assert!((analysis.judgment.confidence - 0.5).abs() < 1e-9);
        assert_eq!(analysis.anomalies[0].kind(), "confidence_out_of_range");
    }

    #[test]
    fn test_missing_confidence_derived_from_completeness() {
        let raw = r#"{
            "scene_description": "Dormitory with bunk beds",
            "activity_description": "People resting",
            "personnel_count": 12,
            "concern_level": "medium",
            "living_condition_issues": "overcrowding, poor ventilation,"
        }"#;
        let analysis = parse(raw).unwrap();
        // 0.3 + 0.2 + 0.15 + 0.1 + 0.15 + 0.1
        assert!((analysis.judgment.confidence - 0.95).abs() < 1e-9);
        assert_eq!(analysis.judgment.indicators, vec!["overcrowding", "poor ventilation"]);
        assert!(analysis.anomalies.is_empty());

        let bare = parse(r#"{"concern_level": "low"}"#).unwrap();
        assert!((bare.judgment.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_indicator_entries_dropped() {
        let raw = concat!(
            r#"{"concern_level": "high", "confidence": 0.6, "#,
            r#""concern_indicators": ["guards", 7, "  ", null]}"#
        );
        let analysis = parse(raw).unwrap();
        assert_eq!(analysis.judgment.indicators, vec!["guards"]);
        let kinds: Vec<_> = analysis.anomalies.iter().map(|a| a.kind()).collect();
        assert_eq!(kinds, vec!["malformed_indicator", "empty_indicator", "malformed_indicator"]);
    }

    #[test]
    fn test_description_truncated() {
        let schema = JudgmentSchema::new(Some(5));
        let analysis = schema
            .parse(r#"{"concern_level": "low", "description": "abcdefghij"}"#)
            .unwrap();
        assert_eq!(analysis.judgment.description, "abcde");
    }

    #[test]
    fn test_first_object_taken_when_prose_has_braces() {
        let raw = r#"{"concern_level": "low", "confidence": 0.7} note: {x} was ignored"#;
        assert_eq!(
            extract_json_object(raw),
            Some(r#"{"concern_level": "low", "confidence": 0.7}"#)
        );
        assert_eq!(parse(raw).unwrap().judgment.concern_level, ConcernLevel::Low);

        let two = r#"{"concern_level": "high"} {"concern_level": "none"}"#;
        assert_eq!(parse(two).unwrap().judgment.concern_level, ConcernLevel::High);
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let raw = concat!(
            r#"Result: {"description": "sign reads \"}{\" and {", "#,
            r#""concern_level": "medium"} done}"#
        );
        let json = extract_json_object(raw).unwrap();
        assert!(json.ends_with(r#""medium"}"#));
        let analysis = parse(raw).unwrap();
        assert_eq!(analysis.judgment.concern_level, ConcernLevel::Medium);
        assert_eq!(analysis.judgment.description, r#"sign reads "}{" and {"#);
    }

    #[test]
    fn test_unterminated_object_rejected() {
        let cut = r#"{"concern_level": "high", "description": "cut"#;
        assert_eq!(extract_json_object(cut), None);
        assert!(parse(r#"{"concern_level": "high"  "#).is_err());
    }
}
