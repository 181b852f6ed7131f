//! Integration tests for store-backed ensemble fusion

mod helpers;

use helpers::create_test_db;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use vigil_ai::db::{model_results, verdicts, work_items};
use vigil_ai::fusion::{FusionEngine, FusionPolicy};
use vigil_ai::models::{AgreementLevel, ItemFusionState, ModelJudgment, ModelResult, ResultError};
use vigil_ai::FusionError;
use vigil_common::ConcernLevel;

const MODELS: [&str; 2] = ["llava", "gemma3"];

async fn new_item(pool: &SqlitePool, name: &str) -> i64 {
    let path = PathBuf::from(format!("/data/{}.jpg", name));
    let (id, _) = work_items::register_work_item(pool, &path, None).await.unwrap();
    id
}

async fn record_success(
    pool: &SqlitePool,
    item: i64,
    model: &str,
    level: ConcernLevel,
    confidence: f64,
    indicators: &[&str],
) {
    let judgment = ModelJudgment {
        description: format!("{} sees {}", model, level),
        concern_level: level,
        indicators: indicators.iter().map(|s| s.to_string()).collect(),
        confidence,
    };
    let result = ModelResult::success(item, model, judgment, Duration::from_millis(900), 1);
    model_results::insert_result(pool, &result).await.unwrap();
}

async fn record_failure(pool: &SqlitePool, item: i64, model: &str) {
    let error = ResultError {
        kind: "transient".to_string(),
        detail: "connection refused".to_string(),
        raw_output: None,
    };
    let result = ModelResult::failed(item, model, error, Duration::from_secs(1), 3);
    model_results::insert_result(pool, &result).await.unwrap();
}

#[tokio::test]
async fn test_failed_only_item_gets_no_verdict() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let item = new_item(&pool, "a").await;
    record_failure(&pool, item, "llava").await;
    record_failure(&pool, item, "gemma3").await;

    let engine = FusionEngine::new(pool.clone(), FusionPolicy::for_models(&MODELS));
    let err = engine.fuse(item).await.unwrap_err();
    assert!(matches!(
        err,
        FusionError::InsufficientEvidence { work_item_id } if work_item_id == item
    ));
    assert!(engine.try_fuse(item).await.unwrap().is_none());
    assert!(verdicts::load_verdict(&pool, item).await.unwrap().is_none());
}

#[tokio::test]
async fn test_quorum_and_degraded_mode() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let item = new_item(&pool, "b").await;
    record_success(&pool, item, "llava", ConcernLevel::High, 0.8, &["barrier"]).await;
    record_failure(&pool, item, "gemma3").await;

    let strict = FusionEngine::new(pool.clone(), FusionPolicy::for_models(&MODELS));
    let err = strict.fuse(item).await.unwrap_err();
    assert!(matches!(err, FusionError::QuorumNotMet { have: 1, need: 2 }));
    assert!(verdicts::load_verdict(&pool, item).await.unwrap().is_none());

    let lenient = FusionEngine::new(
        pool.clone(),
        FusionPolicy {
            min_quorum: Some(1),
            ..FusionPolicy::for_models(&MODELS)
        },
    );
    let stored = lenient.fuse(item).await.unwrap();
    assert!(stored.verdict.low_confidence);
    assert_eq!(stored.verdict.contributing_models, vec!["llava".to_string()]);
    assert_eq!(stored.verdict.concern_level, ConcernLevel::High);
    assert_eq!(stored.fusion_state(), ItemFusionState::Fused);

    // The late model's success completes the quorum and rewrites the verdict
    record_success(&pool, item, "gemma3", ConcernLevel::None, 0.6, &[]).await;
    let refused = lenient.fuse(item).await.unwrap();
    assert_eq!(refused.fusion_count, 2);
    assert_eq!(refused.fusion_state(), ItemFusionState::Refused);
    assert!(!refused.verdict.low_confidence);
    assert_eq!(refused.verdict.concern_level, ConcernLevel::High);
    assert_eq!(refused.verdict.agreement, AgreementLevel::Low);
    // Spread of 3 with a high report: flagged regardless of confidence
    assert!(refused.verdict.flagged_for_review);
    // mean 0.7 × (0.5 + 0.5 × 1/2)
    assert!((refused.verdict.confidence - 0.525).abs() < 1e-9);
}

#[tokio::test]
async fn test_repeat_fusion_is_deterministic_and_not_counted() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let item = new_item(&pool, "c").await;
    record_success(&pool, item, "gemma3", ConcernLevel::Medium, 0.55, &["Tarp", "rope"]).await;
    record_success(&pool, item, "llava", ConcernLevel::Medium, 0.65, &["tarp"]).await;

    let engine = FusionEngine::new(pool.clone(), FusionPolicy::for_models(&MODELS));
    let first = engine.fuse(item).await.unwrap();
    let second = engine.fuse(item).await.unwrap();

    assert_eq!(first.verdict, second.verdict);
    // No new evidence between the two passes
    assert_eq!(second.fusion_count, 1);
    assert_eq!(second.fusion_state(), ItemFusionState::Fused);
    assert_eq!(first.verdict.indicators, vec!["Tarp".to_string(), "rope".to_string()]);
    assert_eq!(first.verdict.agreement, AgreementLevel::Perfect);
    assert!((first.verdict.confidence - 0.6).abs() < 1e-9);
}

#[tokio::test]
async fn test_fuse_all_counts() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let complete = new_item(&pool, "complete").await;
    let partial = new_item(&pool, "partial").await;
    let untouched = new_item(&pool, "untouched").await;

    record_success(&pool, complete, "llava", ConcernLevel::Low, 0.7, &[]).await;
    record_success(&pool, complete, "gemma3", ConcernLevel::Low, 0.9, &[]).await;
    record_success(&pool, partial, "llava", ConcernLevel::Medium, 0.7, &[]).await;
    record_failure(&pool, untouched, "llava").await;

    let engine = FusionEngine::new(pool.clone(), FusionPolicy::for_models(&MODELS));
    let summary = engine.fuse_all().await.unwrap();
    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.fused, 1);
    assert_eq!(summary.refused, 0);
    assert_eq!(summary.incomplete, 1);

    let again = engine.fuse_all().await.unwrap();
    assert_eq!(again.fused, 0);
    assert_eq!(again.refused, 0);
    assert_eq!(again.unchanged, 1);
    assert_eq!(again.incomplete, 1);

    let coverage = verdicts::fusion_coverage(&pool).await.unwrap();
    assert_eq!(coverage.fused, 1);
    assert_eq!(coverage.refused, 0);

    // The partial item's quorum completes; the complete one has nothing new
    record_success(&pool, partial, "gemma3", ConcernLevel::Medium, 0.8, &[]).await;
    let third = engine.fuse_all().await.unwrap();
    assert_eq!(third.fused, 1);
    assert_eq!(third.unchanged, 1);
    assert_eq!(third.refused, 0);

    // A late model on an already fused item is new evidence
    let late = FusionEngine::new(
        pool.clone(),
        FusionPolicy {
            min_quorum: Some(2),
            ..FusionPolicy::for_models(&["llava", "gemma3", "qwen"])
        },
    );
    record_success(&pool, complete, "qwen", ConcernLevel::Low, 0.8, &[]).await;
    let fourth = late.fuse_all().await.unwrap();
    assert_eq!(fourth.refused, 1);
    assert_eq!(fourth.unchanged, 1);

    let coverage = verdicts::fusion_coverage(&pool).await.unwrap();
    assert_eq!(coverage.fused, 1);
    assert_eq!(coverage.refused, 1);
}

#[tokio::test]
async fn test_priority_list_order_and_flag_filter() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let critical = new_item(&pool, "critical").await;
    let medium = new_item(&pool, "medium").await;
    let high = new_item(&pool, "high").await;

    for (item, level, confidence) in [
        (critical, ConcernLevel::Critical, 0.9),
        (medium, ConcernLevel::Medium, 0.9),
        (high, ConcernLevel::High, 0.5),
    ] {
        for model in MODELS {
            record_success(&pool, item, model, level, confidence, &[]).await;
        }
    }

    let engine = FusionEngine::new(pool.clone(), FusionPolicy::for_models(&MODELS));
    engine.fuse_all().await.unwrap();

    let ranked = verdicts::priority_list(&pool, None, false).await.unwrap();
    let order: Vec<i64> = ranked.iter().map(|v| v.verdict.work_item_id).collect();
    assert_eq!(order, vec![critical, high, medium]);

    let flagged = verdicts::priority_list(&pool, None, true).await.unwrap();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0].verdict.work_item_id, critical);

    let top = verdicts::priority_list(&pool, Some(2), false).await.unwrap();
    assert_eq!(top.len(), 2);
}
