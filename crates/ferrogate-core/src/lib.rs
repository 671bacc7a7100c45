//! # Ferrogate Core
//!
//! Circuit-breaker-protected HTTP calls to unreliable market-data providers, with
//! breaker state shared across processes and telemetry for every attempt.
//!
//! ## Overview
//!
//! - **Shared breaker state**: one [`BreakerRecord`] per provider in a
//!   [`BreakerStore`], written only by versioned compare-and-swap
//! - **Pure decisions**: [`CircuitBreaker`] maps `(record, now, outcome)` to the
//!   next record without I/O
//! - **Single trial**: the open-to-half-open move is a claim; only the caller whose
//!   claim lands makes the trial call
//! - **Non-blocking telemetry**: [`TelemetryRecorder`] queues one entry per call and
//!   writes it from a background task
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ferrogate_core::{
//!     HttpRequest, ProviderId, RequestError, RequestMaker, TelemetryRecorder, Warehouse,
//!     WarehouseBreakerStore, WarehouseTelemetrySink,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!     let store = Arc::new(WarehouseBreakerStore::new(warehouse.clone()));
//!     let telemetry = Arc::new(TelemetryRecorder::spawn(Arc::new(
//!         WarehouseTelemetrySink::new(warehouse),
//!     )));
//!
//!     let nse = RequestMaker::builder(ProviderId::parse("nse")?, store, telemetry.clone())
//!         .build();
//!     let request = HttpRequest::get("https://api.example.com/quotes?symbol=INFY")?;
//!
//!     match nse.request(request, None).await {
//!         Ok(response) => println!("{}", response.body),
//!         Err(RequestError::CircuitOpen(open)) => eprintln!("skipped: {open}"),
//!         Err(other) => eprintln!("failed: {other}"),
//!     }
//!
//!     telemetry.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Breaker States
//!
//! | State | Admission | On success | On failure |
//! |-------|-----------|------------|------------|
//! | `closed` | call | reset count | count + 1; open at `max_failures` |
//! | `open` | reject until `reset_timeout`, then claim trial | unchanged | count + 1 |
//! | `half_open` | reject until the trial lease expires | trial closes | trial reopens |
//!
//! ## Architecture
//!
//! ```text
//! caller ──► RequestMaker ──► BreakerStore.read ──► CircuitBreaker.admit
//!                 │                                        │
//!                 │            ┌── reject ◄────────────────┤
//!                 │            │                           ▼ proceed / claimed trial
//!                 │            │                      HttpClient.execute
//!                 │            │                           │
//!                 │            │        CircuitBreaker.apply_outcome + compare_and_swap
//!                 ▼            ▼                           ▼
//!          TelemetryRecorder.record (exactly once per call) ──► TelemetrySink
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod http_client;
pub mod request_maker;
pub mod retry;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod timestamp;

pub use circuit_breaker::{
    Admission, BreakerRecord, BreakerSettings, CallOutcome, CircuitBreaker, CircuitState,
    ShortCircuitReason,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConfigError, ConfigIssue, FailureStatuses, GatewayConfig, ProviderSettings, TRIAL_LEASE_MARGIN,
};
pub use correlation::CorrelationId;
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{CircuitOpenError, FailureCause, RequestError, RequestFailedError, ValidationError};
pub use ferrogate_warehouse::{
    ApiRequestFilter, ApiRequestRecord, BreakerStateRow, ProviderAvailability, ProviderLatency,
    Warehouse, WarehouseConfig, WarehouseError,
};
pub use http_client::{
    HttpClient, HttpError, HttpErrorKind, HttpMethod, HttpRequest, HttpResponse,
    ReqwestHttpClient, ScriptedHttpClient,
};
pub use request_maker::{GatewayClients, RequestMaker, RequestMakerBuilder};
pub use retry::{Backoff, CasRetryPolicy};
pub use source::ProviderId;
#[cfg(feature = "postgres")]
pub use store::{DatabaseUrlError, PostgresBackend, PostgresConfig};
pub use store::{
    reset_breaker, BreakerStore, CasOutcome, MemoryBreakerStore, StoreError, WarehouseBreakerStore,
};
pub use telemetry::{
    redact_headers, MemoryTelemetrySink, TelemetryEntry, TelemetryError, TelemetryOutcome,
    TelemetryRecorder, TelemetrySink, WarehouseTelemetrySink, DEFAULT_TELEMETRY_CAPACITY,
};
pub use timestamp::UtcDateTime;
