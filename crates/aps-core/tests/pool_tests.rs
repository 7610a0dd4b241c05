//! Integration tests for the execution context pool under concurrent load.
//!
//! The mock interpreter sleeps inside every call so overlapping owners are
//! observable through its live-call counter.

use aps_core::mock::MockEngine;
use aps_core::script::Script;
use aps_core::{ApsError, ContextPool, OverflowPolicy, PoolConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn pool_with(engine: &MockEngine, capacity: usize, timeout: Duration) -> ContextPool {
    ContextPool::new(
        Arc::new(engine.clone()),
        PoolConfig {
            capacity,
            acquire_timeout: timeout,
            overflow: OverflowPolicy::Block,
        },
    )
}

// =============================================================================
// Capacity
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_never_more_than_capacity_checked_out() {
    let engine = MockEngine::new();
    engine.respond("work.js", "generate", json!({ "ok": true }));
    engine.set_delay(Duration::from_millis(15));
    let pool = pool_with(&engine, 2, Duration::from_secs(5));

    let mut runs = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        runs.push(tokio::spawn(async move {
            pool.with_context(|ctx| {
                ctx.evaluate(&Script::new("work.js", ""))?;
                ctx.call("generate", &[])
            })
            .await
        }));
    }
    for run in runs {
        assert!(run.await.unwrap().unwrap().is_ok());
    }

    assert!(engine.max_concurrent_calls() <= 2);
    let stats = pool.stats();
    assert!(stats.high_water <= 2);
    assert!(stats.created <= 2);
    assert_eq!(stats.acquired, 8);
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.checked_out, 0);
}

// =============================================================================
// Release discipline
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_faulting_runs_release_their_context() {
    let engine = MockEngine::new();
    engine.raise("bad.js", "generate", "TypeError: boom");
    let pool = pool_with(&engine, 1, Duration::from_millis(500));

    for _ in 0..3 {
        let outcome = pool
            .with_context(|ctx| {
                ctx.evaluate(&Script::new("bad.js", ""))?;
                ctx.call("generate", &[json!(1)])
            })
            .await
            .unwrap();
        assert!(outcome.is_err());
    }
    let stats = pool.stats();
    assert_eq!(stats.acquired, stats.released);
    assert_eq!(stats.created, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_abandoned_run_still_releases() {
    let engine = MockEngine::new();
    engine.respond("slow.js", "generate", json!(null));
    engine.set_delay(Duration::from_millis(100));
    let pool = pool_with(&engine, 1, Duration::from_secs(2));

    let abandoned = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.with_context(|ctx| {
                ctx.evaluate(&Script::new("slow.js", ""))?;
                ctx.call("generate", &[])
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    abandoned.abort();

    // the blocking call finishes on its own and hands the context back
    let next = pool.acquire().await;
    assert!(next.is_ok());
    drop(next);
    let stats = pool.stats();
    assert_eq!(stats.acquired, stats.released);
}

#[tokio::test]
async fn test_block_policy_reports_exhaustion() {
    let engine = MockEngine::new();
    let pool = pool_with(&engine, 1, Duration::from_millis(10));
    let _held = pool.acquire().await.unwrap();
    match pool.acquire().await {
        Err(ApsError::PoolExhausted(msg)) => assert!(msg.contains("no script context")),
        other => panic!("expected exhaustion, got {:?}", other.map(|c| c.id())),
    }
}

// =============================================================================
// Isolation
// =============================================================================

#[tokio::test]
async fn test_script_name_is_reset_before_each_evaluation() {
    let engine = MockEngine::new();
    engine.respond("prepare/iob.js", "generate", json!(1));
    let pool = pool_with(&engine, 1, Duration::from_secs(1));

    pool.with_context(|ctx| {
        ctx.evaluate(&Script::new("prepare/log.js", ""))?;
        ctx.evaluate(&Script::new("prepare/iob.js", ""))?;
        ctx.call("generate", &[])
    })
    .await
    .unwrap()
    .unwrap();

    let calls = engine.calls();
    assert_eq!(calls[0].globals["scriptName"], json!("iob.js"));
}

#[tokio::test]
async fn test_batch_failure_names_the_script() {
    let engine = MockEngine::new();
    let pool = pool_with(&engine, 1, Duration::from_secs(1));
    let scripts = vec![
        Script::new("prepare/log.js", ""),
        Script::new("bundle/meal.js", r#"{"fail": "SyntaxError: unexpected token"}"#),
        Script::new("prepare/meal.js", ""),
    ];
    let (name, fault) = pool
        .with_context(move |ctx| ctx.evaluate_batch(&scripts))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(name, "meal.js");
    assert!(fault.to_string().contains("SyntaxError"));
}
