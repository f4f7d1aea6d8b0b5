// src/token_store/tests/mod.rs

use std::time::Duration;
use tokio_test::assert_ok;
use tracing_test::traced_test;

use crate::config::RuntimeMode;
use crate::error::ErrorKind;
use crate::storage::{DurableBackend, FastBackend};
use crate::test_utils::test_layer;
use crate::token_store::RefreshTokenRecord;

const DAY: i64 = 86_400;

#[tokio::test]
async fn test_save_then_get_and_validate() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Strict, &[42]);
    let store = &layer.token_store;

    store.save(42, "tok-1", DAY).await.unwrap();

    assert_eq!(store.get(42).await.as_deref(), Some("tok-1"));
    assert!(store.validate(42, "tok-1").await);
    assert!(!store.validate(42, "tok-0").await);
    assert!(store.exists(42).await);

    // the cached copy carries its expiry
    let raw = fast.get("refresh_token:42").await.unwrap().unwrap();
    let record: RefreshTokenRecord = serde_json::from_str(&raw).unwrap();
    assert_eq!(record.token, "tok-1");
    assert_eq!(record.user_id, 42);
}

#[tokio::test]
async fn test_save_replaces_previous_token() {
    let (layer, _, durable, _) = test_layer(RuntimeMode::Strict, &[7]);
    let store = &layer.token_store;

    store.save(7, "old", DAY).await.unwrap();
    store.save(7, "new", DAY).await.unwrap();

    assert!(store.validate(7, "new").await);
    assert!(!store.validate(7, "old").await);

    let row = durable.find_by_user_id(7).await.unwrap().unwrap();
    assert_eq!(row.refresh_token.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_delete_clears_both_backends() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Strict, &[9]);
    let store = &layer.token_store;

    store.save(9, "tok", DAY).await.unwrap();
    store.delete(9).await;

    assert_eq!(store.get(9).await, None);
    assert!(!store.exists(9).await);
    assert!(!fast.exists("refresh_token:9").await.unwrap());

    // deleting again is harmless
    store.delete(9).await;
}

#[tokio::test]
async fn test_delete_reaches_cache_while_unhealthy() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Permissive, &[3]);
    let store = &layer.token_store;
    store.save(3, "tok", DAY).await.unwrap();

    fast.set_failing(true);
    layer.health.probe().await;
    fast.set_failing(false);

    store.delete(3).await;
    assert!(!fast.exists("refresh_token:3").await.unwrap());
}

// Scenario: the fast backend is down, the durable store keeps serving
#[tokio::test]
async fn test_outage_falls_back_to_durable() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Strict, &[42]);
    let store = &layer.token_store;

    fast.set_failing(true);
    layer.health.probe().await;
    assert!(!layer.health.is_healthy());
    let calls = fast.operations();

    assert_ok!(store.save(42, "tok-abc", 600).await);
    assert_eq!(store.get(42).await.as_deref(), Some("tok-abc"));
    assert!(store.validate(42, "tok-abc").await);
    assert!(!store.exists(42).await, "exists is a fast path hint only");
    // only the eviction attempt reached the fast backend
    assert_eq!(fast.operations(), calls + 1);
    assert_eq!(store.stale_count(), 1);

    // once recovered, the durable copy is still found through the cache miss
    fast.set_failing(false);
    layer.health.probe().await;
    assert_eq!(store.get(42).await.as_deref(), Some("tok-abc"));
    assert_eq!(store.stale_count(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_rotation_during_outage_is_not_served_after_recovery() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Permissive, &[5]);
    let store = &layer.token_store;
    store.save(5, "old", DAY).await.unwrap();

    fast.set_failing(true);
    layer.health.probe().await;
    assert_ok!(store.save(5, "new", DAY).await);
    assert!(logs_contain("Failed to evict cached refresh token"));

    fast.set_failing(false);
    layer.health.probe().await;
    assert!(layer.health.is_healthy());

    assert_eq!(store.get(5).await.as_deref(), Some("new"));
    assert!(!store.validate(5, "old").await);
    assert!(!fast.inner().exists("refresh_token:5").await.unwrap());
}

#[tokio::test]
async fn test_rotation_while_marked_unhealthy_evicts_immediately() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Strict, &[6]);
    let store = &layer.token_store;
    store.save(6, "old", DAY).await.unwrap();

    // a failed health check, but the backend answers again by the time of the save
    fast.set_failing(true);
    layer.health.probe().await;
    fast.set_failing(false);

    store.save(6, "new", DAY).await.unwrap();
    assert!(!fast.exists("refresh_token:6").await.unwrap());
    assert_eq!(store.stale_count(), 0);

    layer.health.probe().await;
    assert!(store.validate(6, "new").await);
    assert!(!store.validate(6, "old").await);
}

#[tokio::test]
async fn test_stale_user_bypasses_cache_until_evicted() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Permissive, &[12]);
    let store = &layer.token_store;
    store.save(12, "old", DAY).await.unwrap();

    fast.set_failing(true);
    layer.health.probe().await;
    store.save(12, "new", DAY).await.unwrap();

    // healthy again, but the stale copy still can't be removed
    fast.set_failing(false);
    layer.health.probe().await;
    fast.set_failing(true);
    assert_eq!(store.get(12).await.as_deref(), Some("new"));
    assert!(!store.exists(12).await);
    assert_eq!(store.stale_count(), 1);

    fast.set_failing(false);
    assert_eq!(store.get(12).await.as_deref(), Some("new"));
    assert_eq!(store.stale_count(), 0);
}

#[tokio::test]
async fn test_cache_read_errors_fall_through() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Permissive, &[11]);
    let store = &layer.token_store;
    store.save(11, "tok", DAY).await.unwrap();

    // monitor hasn't noticed yet
    fast.set_failing(true);
    assert_eq!(store.get(11).await.as_deref(), Some("tok"));
    assert!(!store.exists(11).await);
}

#[tokio::test]
#[traced_test]
async fn test_durable_failure_in_strict_mode() {
    let (layer, fast, durable, _) = test_layer(RuntimeMode::Strict, &[1]);
    let store = &layer.token_store;

    durable.set_failing(true);
    let err = store.save(1, "tok", DAY).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DurableFailure);
    assert!(logs_contain("Failed to persist refresh token"));

    // no cached copy the durable store never saw
    assert!(!fast.exists("refresh_token:1").await.unwrap());
    assert_eq!(store.get(1).await, None);
}

#[tokio::test]
async fn test_durable_failure_in_permissive_mode() {
    let (layer, _, durable, _) = test_layer(RuntimeMode::Permissive, &[1]);
    let store = &layer.token_store;

    durable.set_failing(true);
    assert_ok!(store.save(1, "tok", DAY).await);

    durable.set_failing(false);
    assert_eq!(store.get(1).await, None);
}

#[tokio::test]
async fn test_unknown_user_is_a_durable_failure() {
    let (layer, _, _, _) = test_layer(RuntimeMode::Strict, &[]);
    let err = layer.token_store.save(404, "tok", DAY).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DurableFailure);
}

#[tokio::test]
async fn test_cached_copy_expires_with_ttl() {
    let (layer, fast, _, clock) = test_layer(RuntimeMode::Strict, &[2]);
    let store = &layer.token_store;

    store.save(2, "short", 10).await.unwrap();
    assert!(store.exists(2).await);

    clock.advance(Duration::from_secs(11));
    assert!(!store.exists(2).await);
    assert!(!fast.exists("refresh_token:2").await.unwrap());
    // the durable row has no expiry
    assert!(store.validate(2, "short").await);
}

#[tokio::test]
async fn test_non_positive_ttl_skips_cache() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Strict, &[8]);
    let store = &layer.token_store;

    store.save(8, "tok", 0).await.unwrap();
    store.save(8, "tok", -5).await.unwrap();

    assert!(!fast.exists("refresh_token:8").await.unwrap());
    assert!(store.validate(8, "tok").await);
}

#[tokio::test]
async fn test_zero_ttl_save_evicts_cached_token() {
    let (layer, fast, _, _) = test_layer(RuntimeMode::Strict, &[8]);
    let store = &layer.token_store;

    store.save(8, "old", DAY).await.unwrap();
    assert!(store.exists(8).await);

    store.save(8, "new", 0).await.unwrap();

    assert!(!fast.exists("refresh_token:8").await.unwrap());
    assert_eq!(store.get(8).await.as_deref(), Some("new"));
    assert!(!store.validate(8, "old").await);
}
