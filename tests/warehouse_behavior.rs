//! Behavior-driven tests for DuckDB-backed breaker state and telemetry
//!
//! These tests verify what a user sees in the warehouse after guarded calls:
//! durable breaker rows, an audit trail per call and availability summaries.

mod support;

use std::sync::Arc;
use std::time::Duration;

use ferrogate_core::{
    ApiRequestFilter, BreakerStore, CircuitState, CorrelationId, HttpError, HttpMethod,
    HttpRequest, HttpResponse, ManualClock, RequestMaker, ScriptedHttpClient, TelemetryRecorder,
    Warehouse, WarehouseBreakerStore, WarehouseConfig, WarehouseTelemetrySink,
};
use support::{epoch, provider, quote_request, settings, EPOCH_MS};
use tempfile::tempdir;

const RESET: Duration = Duration::from_secs(60);

struct Gateway {
    warehouse: Warehouse,
    store: Arc<WarehouseBreakerStore>,
    telemetry: Arc<TelemetryRecorder>,
    http: Arc<ScriptedHttpClient>,
    clock: Arc<ManualClock>,
}

impl Gateway {
    fn open(home: &std::path::Path) -> Self {
        let warehouse = Warehouse::open(WarehouseConfig {
            max_pool_size: 2,
            ..WarehouseConfig::at_home(home)
        })
        .expect("warehouse open");
        Self {
            store: Arc::new(WarehouseBreakerStore::new(warehouse.clone())),
            telemetry: Arc::new(TelemetryRecorder::spawn(Arc::new(
                WarehouseTelemetrySink::new(warehouse.clone()),
            ))),
            http: Arc::new(ScriptedHttpClient::new()),
            clock: Arc::new(ManualClock::new(epoch())),
            warehouse,
        }
    }

    fn maker(&self, id: &str, max_failures: u32) -> RequestMaker {
        RequestMaker::builder(provider(id), self.store.clone(), self.telemetry.clone())
            .with_settings(settings(max_failures, RESET))
            .with_http_client(self.http.clone())
            .with_clock(self.clock.clone())
            .build()
    }
}

// =============================================================================
// Warehouse: Breaker state
// =============================================================================

#[tokio::test]
async fn when_circuit_trips_the_open_row_is_visible_in_the_warehouse() {
    // Given: A gateway backed by a fresh warehouse
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path());
    let maker = gateway.maker("nse", 2);
    gateway.http.push_status(500, "boom");
    gateway.http.push_status(500, "boom");

    // When: Two calls fail
    let _ = maker.request(quote_request(), None).await;
    let _ = maker.request(quote_request(), None).await;

    // Then: The breaker row is open, versioned once per write
    let rows = gateway.warehouse.list_breaker_states().expect("list rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].provider_id, "nse");
    assert_eq!(rows[0].state, "open");
    assert_eq!(rows[0].consecutive_failures, 2);
    assert_eq!(rows[0].opened_at_ms, Some(EPOCH_MS));
    assert_eq!(rows[0].version, 2);
}

#[tokio::test]
async fn when_the_gateway_restarts_breaker_state_survives() {
    // Given: A circuit tripped before a restart
    let temp = tempdir().expect("tempdir");
    {
        let gateway = Gateway::open(temp.path());
        let maker = gateway.maker("nse", 1);
        gateway.http.push(Err(HttpError::connect("connection reset")));
        let _ = maker.request(quote_request(), None).await;
        gateway.telemetry.close().await;
    }

    // When: A new gateway opens the same home
    let gateway = Gateway::open(temp.path());
    let maker = gateway.maker("nse", 1);

    // Then: Calls are still short-circuited
    let err = maker.request(quote_request(), None).await.expect_err("still open");
    assert!(err.is_circuit_open());
    assert_eq!(gateway.http.call_count(), 0);

    let record = gateway.store.read(&provider("nse")).await.expect("readable");
    assert_eq!(record.state, CircuitState::Open);
    assert_eq!(record.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn when_workers_race_for_a_trial_on_duckdb_only_one_claims_it() {
    // Given: An open circuit past its cooldown and a slow provider
    let temp = tempdir().expect("tempdir");
    let mut gateway = Gateway::open(temp.path());
    gateway.http = Arc::new(ScriptedHttpClient::new().with_latency(Duration::from_millis(300)));
    let tripper = gateway.maker("nse", 1);
    gateway.http.push_status(500, "boom");
    let _ = tripper.request(quote_request(), None).await;
    gateway.clock.advance(Duration::from_secs(61));

    // When: Four workers call at once
    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..4 {
        let maker = gateway.maker("nse", 1);
        tasks.spawn(async move { maker.request(quote_request(), None).await });
    }
    let mut successes = 0;
    while let Some(joined) = tasks.join_next().await {
        if joined.expect("task should not panic").is_ok() {
            successes += 1;
        }
    }

    // Then: Only the trial reached the provider and it closed the circuit
    assert_eq!(successes, 1);
    assert_eq!(gateway.http.call_count(), 2);
    let record = gateway.store.read(&provider("nse")).await.expect("readable");
    assert_eq!(record.state, CircuitState::Closed);
}

// =============================================================================
// Warehouse: Request log
// =============================================================================

#[tokio::test]
async fn when_calls_are_logged_user_can_filter_and_summarize_them() {
    // Given: Mixed traffic to two providers, one minute apart
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path());
    let nse = gateway.maker("nse", 2);
    let bse = gateway.maker("bse", 5);

    gateway.http.push_status(200, "{\"ok\":true}");
    let _ = bse.request(quote_request(), None).await;

    gateway.clock.advance(Duration::from_secs(60));
    gateway.http.push_status(503, "down");
    gateway.http.push_status(503, "down");
    let _ = nse.request(quote_request(), None).await;
    let _ = nse.request(quote_request(), None).await;
    let _ = nse.request(quote_request(), None).await;
    gateway.telemetry.close().await;

    // When: The user asks for short-circuited nse calls
    let short_circuited = gateway
        .warehouse
        .query_api_requests(&ApiRequestFilter {
            provider_id: Some(String::from("nse")),
            outcome: Some(String::from("short_circuited")),
            ..ApiRequestFilter::default()
        })
        .expect("query");

    // Then: Exactly the rejected call is returned with its state and reason
    assert_eq!(short_circuited.len(), 1);
    assert_eq!(short_circuited[0].breaker_state, "open");
    assert_eq!(short_circuited[0].error_kind.as_deref(), Some("open"));
    assert_eq!(short_circuited[0].status_code, None);

    // And: A time range excludes the earlier bse call
    let recent = gateway
        .warehouse
        .query_api_requests(&ApiRequestFilter {
            since_ms: Some(EPOCH_MS + 60_000),
            ..ApiRequestFilter::default()
        })
        .expect("query");
    assert_eq!(recent.len(), 3);
    assert!(recent.iter().all(|record| record.provider_id == "nse"));

    // And: Availability is summarized per provider
    let availability = gateway.warehouse.provider_availability(None).expect("summary");
    assert_eq!(availability.len(), 2);
    let bse_summary = &availability[0];
    assert_eq!(bse_summary.provider_id, "bse");
    assert_eq!(bse_summary.availability, Some(1.0));
    let nse_summary = &availability[1];
    assert_eq!(nse_summary.attempts, 3);
    assert_eq!(nse_summary.failures, 2);
    assert_eq!(nse_summary.short_circuited, 1);
    assert_eq!(nse_summary.availability, Some(0.0));
}

#[tokio::test]
async fn when_a_correlation_id_is_reused_every_call_keeps_its_own_row() {
    // Given: A caller that retries under the same trace id
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path());
    let maker = gateway.maker("nse", 3);
    let trace = CorrelationId::parse("trace-42").expect("valid");
    gateway.http.push_status(503, "busy");
    gateway.http.push_status(200, "{\"ok\":true}");

    // When: Two calls are made with that id
    let _ = maker.request(quote_request(), Some(trace.clone())).await;
    let _ = maker.request(quote_request(), Some(trace)).await;
    gateway.telemetry.close().await;

    // Then: Both attempts are in the log, newest first
    let rows = gateway
        .warehouse
        .query_api_requests(&ApiRequestFilter {
            correlation_id: Some(String::from("trace-42")),
            ..ApiRequestFilter::default()
        })
        .expect("query");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].outcome, "success");
    assert_eq!(rows[1].outcome, "failure");
}

#[tokio::test]
async fn when_a_call_carries_headers_and_payload_they_are_stored_with_credentials_hidden() {
    // Given: A POST with an API key and a JSON body, answered with two cookies
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path());
    let maker = gateway.maker("nse", 3);
    let mut response = HttpResponse::ok_json("{\"id\":7}");
    response.append_header("Set-Cookie", "a=1");
    response.append_header("X-Request-Id", "up-9");
    gateway.http.push(Ok(response));
    let request = HttpRequest::parse(HttpMethod::Post, "https://api.example.test/orders")
        .expect("valid")
        .with_header("X-API-Key", "k-123")
        .with_header("Accept", "application/json")
        .with_body("{\"qty\":1}");

    // When: The call succeeds
    maker.request(request, None).await.expect("call succeeds");
    gateway.telemetry.close().await;

    // Then: The stored row keeps the request and response details
    let rows = gateway
        .warehouse
        .query_api_requests(&ApiRequestFilter::default())
        .expect("query");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].request_headers.as_deref(),
        Some(r#"{"accept":"application/json","x-api-key":"[redacted]"}"#)
    );
    assert_eq!(rows[0].request_payload.as_deref(), Some("{\"qty\":1}"));
    assert_eq!(
        rows[0].response_headers.as_deref(),
        Some(
            r#"{"content-type":"application/json","set-cookie":"[redacted]","x-request-id":"up-9"}"#
        )
    );
}

#[tokio::test]
async fn when_calls_were_attempted_latency_is_summarized_from_the_view() {
    // Given: One attempted call and one short-circuited call
    let temp = tempdir().expect("tempdir");
    let gateway = Gateway::open(temp.path());
    let maker = gateway.maker("nse", 1);
    gateway.http.push_status(500, "boom");
    let _ = maker.request(quote_request(), None).await;
    let _ = maker.request(quote_request(), None).await;
    gateway.telemetry.close().await;

    // When: The user asks for latency
    let latency = gateway.warehouse.provider_latency().expect("latency");

    // Then: Only the attempted call is summarized
    assert_eq!(latency.len(), 1);
    assert_eq!(latency[0].provider_id, "nse");
    assert!(latency[0].p95_duration_ms >= 0.0);
}
