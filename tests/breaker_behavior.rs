//! Behavior-driven tests for the circuit breaker lifecycle
//!
//! These tests drive a `RequestMaker` through closed, open and half-open states
//! with a manual clock, an in-memory store and a scripted transport.

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use ferrogate_core::{
    BreakerRecord, CircuitState, CorrelationId, FailureCause, FailureStatuses, HttpErrorKind,
    MemoryBreakerStore, RequestError, ScriptedHttpClient, ShortCircuitReason, TelemetryOutcome,
};
use support::{
    competing_failure, epoch, open_record, quote_request, settings, ContendedStore, Harness,
    UnreachableStore,
};

const RESET: Duration = Duration::from_secs(60);

fn memory_harness() -> (Arc<MemoryBreakerStore>, Harness) {
    let store = Arc::new(MemoryBreakerStore::new());
    let harness = Harness::new(store.clone(), ScriptedHttpClient::new());
    (store, harness)
}

// =============================================================================
// Closed: counting failures
// =============================================================================

#[tokio::test]
async fn when_failures_reach_threshold_circuit_opens_and_rejects_without_calling() {
    // Given: A provider allowing three consecutive failures
    let (store, harness) = memory_harness();
    let maker = harness.maker(settings(3, RESET));
    for _ in 0..3 {
        harness.http.push_status(503, "unavailable");
    }

    // When: Three calls fail
    for _ in 0..3 {
        let err = maker.request(quote_request(), None).await.expect_err("must fail");
        assert!(err.is_request_failed());
    }

    // Then: The shared record is open with three failures
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.state, CircuitState::Open);
    assert_eq!(record.consecutive_failures, 3);
    assert_eq!(record.opened_at, Some(epoch()));
    assert_eq!(record.version, 3);

    // And: The next call is rejected before reaching the network
    let err = maker.request(quote_request(), None).await.expect_err("must short-circuit");
    let RequestError::CircuitOpen(open) = err else {
        panic!("expected circuit open, got {err:?}");
    };
    assert_eq!(open.reason, ShortCircuitReason::Open);
    assert_eq!(open.retry_after, Some(RESET));
    assert_eq!(harness.http.call_count(), 3);
}

#[tokio::test]
async fn when_a_call_succeeds_while_closed_failure_count_resets() {
    // Given: Two failures already counted
    let (store, harness) = memory_harness();
    let maker = harness.maker(settings(3, RESET));
    harness.http.push_status(500, "boom");
    harness.http.push_status(500, "boom");
    harness.http.push_status(200, "{\"price\":1}");

    // When: The third call succeeds
    let _ = maker.request(quote_request(), None).await;
    let _ = maker.request(quote_request(), None).await;
    let response = maker
        .request(quote_request(), None)
        .await
        .expect("success should pass through");

    // Then: The count is back to zero and the body is returned untouched
    assert_eq!(response.body, "{\"price\":1}");
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(record.consecutive_failures, 0);
}

#[tokio::test]
async fn when_status_is_outside_failure_set_call_counts_as_success() {
    // Given: Only server errors count as failures
    let (store, harness) = memory_harness();
    let mut only_server_errors = settings(1, RESET);
    only_server_errors.failure_statuses =
        FailureStatuses::parse(&["500-599"]).expect("valid statuses");
    let maker = harness.maker(only_server_errors);
    harness.http.push_status(404, "not found");

    // When: The provider answers 404
    let response = maker.request(quote_request(), None).await.expect("404 is not a failure");

    // Then: The caller gets the response and the circuit stays closed
    assert_eq!(response.status, 404);
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.state, CircuitState::Closed);
}

#[tokio::test]
async fn when_provider_is_slower_than_timeout_call_fails_as_timeout() {
    // Given: A transport slower than the configured request timeout
    let store = Arc::new(MemoryBreakerStore::new());
    let harness = Harness::new(
        store.clone(),
        ScriptedHttpClient::new().with_latency(Duration::from_millis(500)),
    );
    let mut slow = settings(5, RESET);
    slow.request_timeout = Duration::from_millis(20);
    let maker = harness.maker(slow);

    // When: The call is made
    let err = maker.request(quote_request(), None).await.expect_err("must time out");

    // Then: It is a transport failure of kind timeout and counts against the circuit
    let RequestError::RequestFailed(failed) = err else {
        panic!("expected request failure, got {err:?}");
    };
    let FailureCause::Transport(error) = failed.cause else {
        panic!("expected transport failure");
    };
    assert_eq!(error.kind(), HttpErrorKind::Timeout);
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.consecutive_failures, 1);
}

// =============================================================================
// Open to half-open: the trial call
// =============================================================================

#[tokio::test]
async fn when_reset_timeout_elapses_one_trial_is_allowed_and_success_closes() {
    // Given: An open circuit tripped at the epoch
    let (store, harness) = memory_harness();
    store.seed(&harness.provider, open_record(3, epoch(), 3));
    let maker = harness.maker(settings(3, RESET));

    // When: 61 seconds pass and a call succeeds
    harness.clock.advance(Duration::from_secs(61));
    maker.request(quote_request(), None).await.expect("trial should go out");

    // Then: The circuit is closed with a clean count, through claim and close writes
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record, BreakerRecord { version: 5, ..BreakerRecord::closed() });
    assert_eq!(harness.http.call_count(), 1);

    // And: A single later failure does not reopen it
    harness.http.push_status(500, "boom");
    let _ = maker.request(quote_request(), None).await;
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(record.consecutive_failures, 1);
}

#[tokio::test]
async fn when_trial_fails_circuit_reopens_with_fresh_cooldown() {
    // Given: An open circuit past its cooldown
    let (store, harness) = memory_harness();
    store.seed(&harness.provider, open_record(3, epoch(), 3));
    let maker = harness.maker(settings(3, RESET));
    harness.clock.advance(Duration::from_secs(61));
    harness.http.push_status(502, "bad gateway");

    // When: The trial fails
    let err = maker.request(quote_request(), None).await.expect_err("trial fails");
    assert!(err.is_request_failed());

    // Then: The circuit is open again, timed from the trial
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.state, CircuitState::Open);
    assert_eq!(record.consecutive_failures, 4);
    assert_eq!(record.opened_at, Some(harness.clock_now()));

    // And: Callers are rejected for another full cooldown
    harness.clock.advance(Duration::from_secs(30));
    let err = maker.request(quote_request(), None).await.expect_err("still open");
    assert!(err.is_circuit_open());
}

#[tokio::test]
async fn when_a_trial_claim_goes_stale_another_caller_may_claim_it() {
    // Given: A half-open record whose claimant never reported back
    let (store, harness) = memory_harness();
    store.seed(
        &harness.provider,
        BreakerRecord {
            state: CircuitState::HalfOpen,
            consecutive_failures: 3,
            opened_at: None,
            trial_claimed_at: Some(epoch()),
            version: 4,
        },
    );
    let maker = harness.maker(settings(3, RESET));

    // When: Within the cooldown, callers see the trial in flight
    let err = maker.request(quote_request(), None).await.expect_err("trial in flight");
    let RequestError::CircuitOpen(open) = err else {
        panic!("expected circuit open, got {err:?}");
    };
    assert_eq!(open.reason, ShortCircuitReason::TrialInFlight);

    // Then: Once the trial lease runs out a new trial is claimed and can close the circuit
    harness.clock.advance(Duration::from_secs(61));
    maker.request(quote_request(), None).await.expect("new trial goes out");
    let record = store.snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.state, CircuitState::Closed);
    assert_eq!(harness.http.call_count(), 1);
}

// =============================================================================
// Shared store behavior
// =============================================================================

#[tokio::test]
async fn when_a_competing_write_lands_first_both_failures_are_counted() {
    // Given: A store where another caller records a failure between our read and write
    let store = Arc::new(ContendedStore::new(1, competing_failure));
    let harness = Harness::new(store.clone(), ScriptedHttpClient::new());
    let maker = harness.maker(settings(5, RESET));
    harness.http.push_status(500, "boom");

    // When: Our call fails
    let _ = maker.request(quote_request(), None).await;

    // Then: The retry re-reads and the count reflects both failures
    let record = store.inner().snapshot(&harness.provider).expect("record exists");
    assert_eq!(record.consecutive_failures, 2);
    assert_eq!(record.version, 2);
    assert_eq!(store.swaps.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn when_store_is_unreachable_calls_fail_closed_without_network() {
    // Given: A store that cannot be reached
    let store = Arc::new(UnreachableStore::default());
    let harness = Harness::new(store, ScriptedHttpClient::new());
    let maker = harness.maker(settings(3, RESET));
    let correlation_id = CorrelationId::parse("corr-unreachable").expect("valid");

    // When: A call is made
    let err = maker
        .request(quote_request(), Some(correlation_id.clone()))
        .await
        .expect_err("must fail closed");

    // Then: It is short-circuited for the store, not the provider
    let RequestError::CircuitOpen(open) = err else {
        panic!("expected circuit open, got {err:?}");
    };
    assert_eq!(open.reason, ShortCircuitReason::StoreUnavailable);
    assert_eq!(harness.http.call_count(), 0);

    // And: Exactly one short-circuited entry is recorded with unknown state
    let entries = harness.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].correlation_id, correlation_id);
    assert_eq!(entries[0].outcome, TelemetryOutcome::ShortCircuited);
    assert_eq!(entries[0].error_kind.as_deref(), Some("store_unavailable"));
    assert_eq!(entries[0].breaker_state, None);
}

#[tokio::test]
async fn when_state_is_only_inspected_version_does_not_move() {
    // Given: A record with some history
    let (store, harness) = memory_harness();
    store.seed(&harness.provider, open_record(3, epoch(), 7));
    let maker = harness.maker(settings(3, RESET));

    // When: The record is inspected repeatedly
    for _ in 0..3 {
        let record = maker.breaker_record().await.expect("readable");
        assert_eq!(record.version, 7);
    }

    // Then: Nothing was written
    assert_eq!(store.snapshot(&harness.provider).expect("exists").version, 7);
}

#[tokio::test]
async fn when_stored_record_is_corrupt_call_is_refused_and_reported() {
    // Given: An open record with no open timestamp
    let (store, harness) = memory_harness();
    store.seed(
        &harness.provider,
        BreakerRecord {
            opened_at: None,
            ..open_record(3, epoch(), 2)
        },
    );
    let maker = harness.maker(settings(3, RESET));

    // When: A call is made
    let err = maker.request(quote_request(), None).await.expect_err("must refuse");

    // Then: The corruption is surfaced and the provider is not called
    assert!(matches!(err, RequestError::Corrupt { .. }));
    assert_eq!(harness.http.call_count(), 0);
    let entries = harness.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].error_kind.as_deref(), Some("corrupt_record"));
}
