use request_governor::{
    remote_call, CanonicalKey, FetchOptions, FetchOutcome, Governor, GovernorBuilder, Params,
    RecoveryConfig, RecoveryController, RemoteCall, WarmupFetch,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counting(calls: &Arc<AtomicUsize>, value: Value) -> RemoteCall<Value> {
    let calls = Arc::clone(calls);
    remote_call(move || {
        let calls = Arc::clone(&calls);
        let value = value.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    })
}

fn controller(
    governor: &Governor<Value>,
    warmup_calls: &Arc<AtomicUsize>,
) -> RecoveryController<Value> {
    let warmup = WarmupFetch::new(
        "business",
        Params::new(),
        counting(warmup_calls, json!({"name": "Acme"})),
    );
    RecoveryController::new(governor.clone(), warmup, RecoveryConfig::default()).unwrap()
}

/// Saturate a governor: hot key, cached data, breaker tripped, queued work.
async fn wedge(governor: &Governor<Value>) {
    let calls = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let mut params = Params::new();
        params.insert("page".to_string(), json!(i));
        governor
            .fetch("contacts", params, counting(&calls, json!(i)), FetchOptions::default())
            .await
            .unwrap();
    }
    governor.limiter().trip_resource_exhausted();
    let outcome = governor
        .fetch(
            "campaigns",
            Params::new(),
            counting(&calls, json!("spring")),
            FetchOptions::default(),
        )
        .await
        .unwrap();
    assert!(matches!(outcome, FetchOutcome::Deferred));
}

#[tokio::test(start_paused = true)]
async fn test_emergency_reset_clears_everything() {
    let governor = GovernorBuilder::new().build::<Value>().unwrap();
    wedge(&governor).await;
    assert!(!governor.limiter().can_admit(&CanonicalKey::new("contacts")));
    assert_eq!(governor.cache().len(), 5);
    assert_eq!(governor.queue().len(), 1);

    let warmup_calls = Arc::new(AtomicUsize::new(0));
    let recovery = controller(&governor, &warmup_calls);
    recovery.emergency_reset();

    assert!(governor.limiter().can_admit(&CanonicalKey::new("contacts")));
    assert!(!governor.limiter().status().is_limited);
    assert_eq!(governor.limiter().status().global_requests, 0);
    assert!(governor.cache().is_empty());
    assert!(governor.queue().is_empty());
    assert!(recovery.pending_warmup());
    assert_eq!(warmup_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_warmup_refetches_primary_resource() {
    let governor = GovernorBuilder::new().build::<Value>().unwrap();
    let warmup_calls = Arc::new(AtomicUsize::new(0));
    let recovery = controller(&governor, &warmup_calls);

    recovery.emergency_reset();
    tokio::time::sleep(Duration::from_millis(1999)).await;
    assert_eq!(warmup_calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(2)).await;
    assert_eq!(warmup_calls.load(Ordering::SeqCst), 1);
    assert!(!recovery.pending_warmup());
    assert_eq!(
        governor.cache().get("business", &Params::new()),
        Some(json!({"name": "Acme"}))
    );
    assert!(governor.last_known_good().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_reset_runs_one_warmup() {
    let governor = GovernorBuilder::new().build::<Value>().unwrap();
    let warmup_calls = Arc::new(AtomicUsize::new(0));
    let recovery = controller(&governor, &warmup_calls);

    recovery.emergency_reset();
    tokio::time::sleep(Duration::from_millis(500)).await;
    recovery.emergency_reset();

    // The first warm-up would have fired here
    tokio::time::sleep(Duration::from_millis(1600)).await;
    assert_eq!(warmup_calls.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(warmup_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reset_on_idle_governor_is_harmless() {
    let governor = GovernorBuilder::new().build::<Value>().unwrap();
    let warmup_calls = Arc::new(AtomicUsize::new(0));
    let recovery = controller(&governor, &warmup_calls);

    recovery.emergency_reset();
    assert!(governor.cache().is_empty());
    assert!(governor.queue().is_empty());
    assert_eq!(governor.limiter().status().global_requests, 0);
}

#[test]
fn test_zero_warmup_delay_rejected() {
    let governor = GovernorBuilder::new().build::<Value>().unwrap();
    let warmup_calls = Arc::new(AtomicUsize::new(0));
    let warmup = WarmupFetch::new("business", Params::new(), counting(&warmup_calls, json!(1)));

    let result = RecoveryController::new(
        governor,
        warmup,
        RecoveryConfig {
            warmup_delay: Duration::ZERO,
        },
    );
    assert!(result.is_err());
}
