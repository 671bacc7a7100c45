//! Shared fixtures for behavior tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ferrogate_core::{
    Backoff, BreakerRecord, BreakerSettings, BreakerStore, CasOutcome, CasRetryPolicy,
    CircuitState, Clock, HttpRequest, ManualClock, MemoryBreakerStore, MemoryTelemetrySink,
    ProviderId, ProviderSettings, RequestMaker, ScriptedHttpClient, StoreError, TelemetryEntry,
    TelemetryError, TelemetryRecorder, TelemetrySink, UtcDateTime,
};

pub const EPOCH_MS: i64 = 1_700_000_000_000;

pub fn provider(id: &str) -> ProviderId {
    ProviderId::parse(id).expect("valid provider id")
}

pub fn epoch() -> UtcDateTime {
    UtcDateTime::from_unix_millis(EPOCH_MS).expect("in range")
}

pub fn quote_request() -> HttpRequest {
    HttpRequest::get("https://api.example.test/quotes?symbol=INFY").expect("valid request")
}

/// Settings with a small failure threshold and no backoff sleeps.
pub fn settings(max_failures: u32, reset_timeout: Duration) -> ProviderSettings {
    ProviderSettings {
        breaker: BreakerSettings::new(max_failures, reset_timeout).expect("valid settings"),
        cas_retry: CasRetryPolicy::default().with_backoff(Backoff::None),
        ..ProviderSettings::default()
    }
}

/// Record as stored after a trip at `opened_at`.
pub fn open_record(failures: u32, opened_at: UtcDateTime, version: u64) -> BreakerRecord {
    BreakerRecord {
        state: CircuitState::Open,
        consecutive_failures: failures,
        opened_at: Some(opened_at),
        trial_claimed_at: None,
        version,
    }
}

/// Everything a test needs to drive one provider.
pub struct Harness {
    pub provider: ProviderId,
    pub store: Arc<dyn BreakerStore>,
    pub http: Arc<ScriptedHttpClient>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<MemoryTelemetrySink>,
    pub telemetry: Arc<TelemetryRecorder>,
}

impl Harness {
    pub fn new(store: Arc<dyn BreakerStore>, http: ScriptedHttpClient) -> Self {
        let sink = Arc::new(MemoryTelemetrySink::new());
        Self {
            provider: provider("nse"),
            store,
            http: Arc::new(http),
            clock: Arc::new(ManualClock::new(epoch())),
            telemetry: Arc::new(TelemetryRecorder::spawn(sink.clone())),
            sink,
        }
    }

    pub fn maker(&self, settings: ProviderSettings) -> RequestMaker {
        RequestMaker::builder(self.provider.clone(), self.store.clone(), self.telemetry.clone())
            .with_settings(settings)
            .with_http_client(self.http.clone())
            .with_clock(self.clock.clone())
            .build()
    }

    pub fn clock_now(&self) -> UtcDateTime {
        self.clock.now()
    }

    /// Flush the recorder and return what reached the sink.
    pub async fn entries(&self) -> Vec<TelemetryEntry> {
        self.telemetry.close().await;
        self.sink.entries()
    }
}

/// Store that lets another writer land between this caller's read and write.
///
/// The next `conflicts` swaps first apply `competing` to the stored record, then
/// report a conflict.
pub struct ContendedStore {
    inner: MemoryBreakerStore,
    conflicts: AtomicU32,
    competing: fn(&BreakerRecord) -> BreakerRecord,
    pub swaps: AtomicUsize,
}

impl ContendedStore {
    pub fn new(conflicts: u32, competing: fn(&BreakerRecord) -> BreakerRecord) -> Self {
        Self {
            inner: MemoryBreakerStore::new(),
            conflicts: AtomicU32::new(conflicts),
            competing,
            swaps: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &MemoryBreakerStore {
        &self.inner
    }
}

/// A competing caller that recorded one failure.
pub fn competing_failure(record: &BreakerRecord) -> BreakerRecord {
    BreakerRecord {
        consecutive_failures: record.consecutive_failures + 1,
        ..record.clone()
    }
}

/// A competing caller that claimed the half-open trial 61 seconds after the trip.
pub fn competing_trial_claim(record: &BreakerRecord) -> BreakerRecord {
    BreakerRecord {
        state: CircuitState::HalfOpen,
        opened_at: None,
        trial_claimed_at: record
            .opened_at
            .map(|opened_at| opened_at.saturating_add(Duration::from_secs(61))),
        ..record.clone()
    }
}

impl BreakerStore for ContendedStore {
    fn read<'a>(
        &'a self,
        provider: &'a ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<BreakerRecord, StoreError>> + Send + 'a>> {
        self.inner.read(provider)
    }

    fn compare_and_swap<'a>(
        &'a self,
        provider: &'a ProviderId,
        expected_version: u64,
        next: &'a BreakerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + 'a>> {
        Box::pin(async move {
            self.swaps.fetch_add(1, Ordering::SeqCst);
            let inject = self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if inject {
                let current = self.inner.read(provider).await?;
                let competing = (self.competing)(&current);
                self.inner
                    .compare_and_swap(provider, current.version, &competing)
                    .await?;
                return Ok(CasOutcome::Conflict);
            }
            self.inner
                .compare_and_swap(provider, expected_version, next)
                .await
        })
    }
}

/// Store that is never reachable.
#[derive(Debug, Default)]
pub struct UnreachableStore {
    pub reads: AtomicUsize,
}

impl BreakerStore for UnreachableStore {
    fn read<'a>(
        &'a self,
        _provider: &'a ProviderId,
    ) -> Pin<Box<dyn Future<Output = Result<BreakerRecord, StoreError>> + Send + 'a>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(StoreError::unavailable("connection refused")) })
    }

    fn compare_and_swap<'a>(
        &'a self,
        _provider: &'a ProviderId,
        _expected_version: u64,
        _next: &'a BreakerRecord,
    ) -> Pin<Box<dyn Future<Output = Result<CasOutcome, StoreError>> + Send + 'a>> {
        Box::pin(async { Err(StoreError::unavailable("connection refused")) })
    }
}

/// Sink that rejects every entry.
#[derive(Debug, Default)]
pub struct FailingSink {
    pub attempts: AtomicUsize,
}

impl TelemetrySink for FailingSink {
    fn append<'a>(
        &'a self,
        _entry: &'a TelemetryEntry,
    ) -> Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'a>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Err(TelemetryError::sink("disk full")) })
    }
}
