//! Scripted ModelAdapter
//!
//! Answers each artifact according to a per-file script (keyed by the source
//! file name) and records how often it was called and how many calls were
//! in flight at once.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use vigil_ai::adapters::{Analysis, ModelAdapter, ModelConfig};
use vigil_ai::cache::PreparedArtifact;
use vigil_ai::models::ModelJudgment;
use vigil_ai::AdapterError;
use vigil_common::ConcernLevel;

#[derive(Debug, Clone)]
pub enum Script {
    Judge {
        level: ConcernLevel,
        confidence: f64,
        indicators: Vec<&'static str>,
    },
    /// Transient failure for the first `failures` calls, then `then`
    FailTimes { failures: usize, then: Box<Script> },
    Permanent(&'static str),
    Parse(&'static str),
    /// Sleep, then continue with the inner script
    Delay(Duration, Box<Script>),
    /// Never answer
    Hang,
}

impl Script {
    pub fn judge(level: ConcernLevel, confidence: f64) -> Self {
        Script::Judge {
            level,
            confidence,
            indicators: Vec::new(),
        }
    }

    pub fn judge_with(level: ConcernLevel, confidence: f64, indicators: &[&'static str]) -> Self {
        Script::Judge {
            level,
            confidence,
            indicators: indicators.to_vec(),
        }
    }

    fn resolve(&self, nth_call: usize) -> Result<Analysis, AdapterError> {
        match self {
            Script::Judge {
                level,
                confidence,
                indicators,
            } => Ok(Analysis {
                judgment: ModelJudgment {
                    description: format!("scripted {} judgment", level),
                    concern_level: *level,
                    indicators: indicators.iter().map(|s| s.to_string()).collect(),
                    confidence: *confidence,
                },
                anomalies: Vec::new(),
            }),
            Script::FailTimes { failures, then } => {
                if nth_call <= *failures {
                    Err(AdapterError::Transient(format!("scripted outage {}", nth_call)))
                } else {
                    then.resolve(nth_call)
                }
            }
            Script::Permanent(msg) => Err(AdapterError::Permanent(msg.to_string())),
            Script::Parse(raw) => Err(AdapterError::Parse {
                message: "scripted unparseable output".to_string(),
                raw_output: raw.to_string(),
            }),
            Script::Delay(_, inner) => inner.resolve(nth_call),
            Script::Hang => Err(AdapterError::Permanent("hang script resolved".to_string())),
        }
    }
}

pub struct ScriptedAdapter {
    default: Script,
    per_file: HashMap<String, Script>,
    calls: AtomicUsize,
    calls_by_file: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            per_file: HashMap::new(),
            calls: AtomicUsize::new(0),
            calls_by_file: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Script for the artifact whose file name is `file_name`
    pub fn with_file(mut self, file_name: &str, script: Script) -> Self {
        self.per_file.insert(file_name.to_string(), script);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, file_name: &str) -> usize {
        self.calls_by_file.lock().unwrap().get(file_name).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn analyze(
        &self,
        artifact: &PreparedArtifact,
        _config: &ModelConfig,
    ) -> Result<Analysis, AdapterError> {
        let file_name = artifact
            .source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        self.calls.fetch_add(1, Ordering::SeqCst);
        let nth_call = {
            let mut by_file = self.calls_by_file.lock().unwrap();
            let count = by_file.entry(file_name.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let mut script = self.per_file.get(&file_name).unwrap_or(&self.default);
        loop {
            match script {
                Script::Delay(delay, inner) => {
                    tokio::time::sleep(*delay).await;
                    script = inner.as_ref();
                }
                Script::Hang => std::future::pending::<()>().await,
                other => return other.resolve(nth_call),
            }
        }
    }
}
