//! Contract Test: Failure Threshold
//!
//! Verifies how check failures turn into subscriber removal.
//!
//! Constraints verified:
//! - A failing subscriber stays registered until it has failed
//!   continuously for the threshold
//! - Removal at the threshold triggers the removal hook and persists
//! - Any success resets the failure streak
//! - A panicking check fails only its own subscriber
//! - A failure event is emitted every cycle while failing

mod common;

use chrono::Duration;
use common::*;
use drivewatch_core::engine::{EngineComponents, EngineEvent, RemovalReason, WatchEngine};
use drivewatch_core::error::RemoteError;
use drivewatch_core::state::MemorySubscriptionStore;
use drivewatch_core::traits::SubscriptionStore;
use std::collections::HashMap;
use std::sync::Arc;

async fn engine_with(
    emails: &[&str],
    documents: Arc<ScriptedDocumentStore>,
    clock: Arc<ManualClock>,
    hook: Arc<RecordingHook>,
    store: MemorySubscriptionStore,
) -> (WatchEngine, tokio::sync::mpsc::Receiver<EngineEvent>) {
    let mut stored = HashMap::new();
    for email in emails {
        let sub = subscription(email, &[]);
        stored.insert(sub.id().to_string(), sub);
    }
    // Seed through the shared handle so the test can inspect later saves
    store.save(&stored).await.unwrap();

    let components = EngineComponents::new(
        documents,
        StaticRefresher::new("fresh-token"),
        RecordingMessenger::new(),
        Box::new(store),
    )
    .with_clock(clock)
    .with_hook(hook);

    let (engine, _handle, events) = WatchEngine::new(components, &test_config())
        .await
        .expect("engine construction succeeds");
    (engine, events)
}

#[tokio::test]
async fn failing_subscriber_is_removed_at_threshold() {
    let documents = ScriptedDocumentStore::new();
    for _ in 0..3 {
        documents.push_error(RemoteError::Server("503".to_string()));
    }
    let clock = ManualClock::new(t0());
    let hook = RecordingHook::new();
    let store = MemorySubscriptionStore::new();

    let (mut engine, mut events) = engine_with(
        &["ada@example.com"],
        documents,
        clock.clone(),
        hook.clone(),
        store.clone(),
    )
    .await;

    let first = engine.run_cycle().await;
    assert_eq!(first.failures, 1);
    assert_eq!(first.removals, 0);
    assert_eq!(
        engine.registry().state("ada@example.com").unwrap().failing_since,
        Some(t0())
    );

    clock.advance(Duration::hours(23) + Duration::minutes(59));
    let second = engine.run_cycle().await;
    assert_eq!(second.removals, 0, "still inside the threshold");
    assert!(engine.registry().contains("ada@example.com"));

    clock.advance(Duration::minutes(1));
    let third = engine.run_cycle().await;
    assert_eq!(third.removals, 1);
    assert!(!engine.registry().contains("ada@example.com"));
    assert!(store.is_empty().await, "removal is persisted");

    let failures: Vec<EngineEvent> = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::CheckFailed { .. }))
        .collect();
    assert_eq!(failures.len(), 3, "one failure event per failing cycle");
    for event in &failures {
        if let EngineEvent::CheckFailed { failing_since, .. } = event {
            assert_eq!(*failing_since, t0());
        }
    }

    // The removal hook runs on a detached task
    tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
    assert_eq!(hook.removed(), vec!["ada@example.com".to_string()]);
}

#[tokio::test]
async fn removal_event_names_the_threshold() {
    let documents = ScriptedDocumentStore::new();
    documents.push_error(RemoteError::Connectivity("timeout".to_string()));
    documents.push_error(RemoteError::Connectivity("timeout".to_string()));
    let clock = ManualClock::new(t0());

    let (mut engine, mut events) = engine_with(
        &["ada@example.com"],
        documents,
        clock.clone(),
        RecordingHook::new(),
        MemorySubscriptionStore::new(),
    )
    .await;

    engine.run_cycle().await;
    clock.advance(Duration::hours(25));
    engine.run_cycle().await;

    let removed = wait_for_event(&mut events, |e| {
        matches!(e, EngineEvent::SubscriberRemoved { .. })
    })
    .await;
    assert_eq!(
        removed,
        Some(EngineEvent::SubscriberRemoved {
            id: "ada@example.com".to_string(),
            reason: RemovalReason::FailureThreshold,
        })
    );
}

#[tokio::test]
async fn success_resets_failure_streak() {
    let documents = ScriptedDocumentStore::new();
    documents.push_error(RemoteError::Server("500".to_string()));
    documents.push_page(10, vec![]);
    documents.push_error(RemoteError::Server("500".to_string()));
    let clock = ManualClock::new(t0());

    let (mut engine, _events) = engine_with(
        &["ada@example.com"],
        documents,
        clock.clone(),
        RecordingHook::new(),
        MemorySubscriptionStore::new(),
    )
    .await;

    engine.run_cycle().await;
    clock.advance(Duration::hours(20));
    engine.run_cycle().await;
    assert!(engine.registry().state("ada@example.com").unwrap().is_healthy());

    clock.advance(Duration::hours(20));
    let summary = engine.run_cycle().await;
    assert_eq!(summary.removals, 0, "the streak restarted after the success");
    assert_eq!(
        engine.registry().state("ada@example.com").unwrap().failing_since,
        Some(t0() + Duration::hours(40))
    );
}

#[tokio::test]
async fn panicking_check_is_reported_as_failure() {
    let documents = ScriptedDocumentStore::new();
    documents.panic_on_query();
    let clock = ManualClock::new(t0());

    let (mut engine, _events) = engine_with(
        &["ada@example.com", "bob@example.com"],
        documents.clone(),
        clock,
        RecordingHook::new(),
        MemorySubscriptionStore::new(),
    )
    .await;

    let summary = engine.run_cycle().await;

    assert_eq!(summary.served, 2);
    assert_eq!(summary.failures, 2);
    assert_eq!(documents.query_calls(), 2, "every subscriber was still checked");
    assert_eq!(engine.subscriber_count(), 2);
}

#[tokio::test]
async fn invalid_refresh_credential_counts_as_failure() {
    struct RevokedRefresher;

    #[async_trait::async_trait]
    impl drivewatch_core::traits::TokenRefresher for RevokedRefresher {
        async fn refresh_access_token(&self, _refresh_token: &str) -> Result<String, RemoteError> {
            Err(RemoteError::InvalidGrant("invalid_grant".to_string()))
        }
    }

    let documents = ScriptedDocumentStore::new();
    documents.reject_token("");
    let store = MemorySubscriptionStore::new();
    let mut stored = HashMap::new();
    let sub = subscription("ada@example.com", &[]);
    stored.insert(sub.id().to_string(), sub);
    store.save(&stored).await.unwrap();

    let components = EngineComponents::new(
        documents,
        Arc::new(RevokedRefresher),
        RecordingMessenger::new(),
        Box::new(store),
    )
    .with_clock(ManualClock::new(t0()));
    let (mut engine, _handle, mut events) = WatchEngine::new(components, &test_config())
        .await
        .unwrap();

    let summary = engine.run_cycle().await;
    assert_eq!(summary.failures, 1);
    let event = wait_for_event(&mut events, |e| {
        matches!(e, EngineEvent::CheckFailed { .. })
    })
    .await;
    assert!(matches!(
        event,
        Some(EngineEvent::CheckFailed { fatal: true, .. })
    ));
}
