//! Guarded calls to one provider.
//!
//! [`RequestMaker::request`] reads the shared breaker record, short-circuits or
//! claims the half-open trial, performs the call, folds the outcome back into the
//! record with compare-and-swap and hands one telemetry entry to the recorder.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::circuit_breaker::{Admission, CallOutcome, CircuitBreaker, ShortCircuitReason};
use crate::clock::{Clock, SystemClock};
use crate::config::{GatewayConfig, ProviderSettings};
use crate::error::{CircuitOpenError, FailureCause, RequestError, RequestFailedError};
use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::store::{BreakerStore, CasOutcome, StoreError};
use crate::telemetry::{
    excerpt, redact_headers, TelemetryEntry, TelemetryOutcome, TelemetryRecorder,
};
use crate::{BreakerRecord, BreakerSettings, CircuitState, CorrelationId, ProviderId, UtcDateTime};

/// Circuit-breaker-guarded HTTP caller for a single provider.
pub struct RequestMaker {
    provider: ProviderId,
    breaker: CircuitBreaker,
    settings: ProviderSettings,
    http: Arc<dyn HttpClient>,
    store: Arc<dyn BreakerStore>,
    telemetry: Arc<TelemetryRecorder>,
    clock: Arc<dyn Clock>,
}

/// A call allowed through admission.
struct Admitted {
    observed: CircuitState,
    /// Claim stamp when this call is the half-open trial.
    trial: Option<UtcDateTime>,
}

enum Rejection {
    ShortCircuit {
        error: CircuitOpenError,
        observed: Option<CircuitState>,
    },
    Corrupt(String),
}

impl RequestMaker {
    pub fn builder(
        provider: ProviderId,
        store: Arc<dyn BreakerStore>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> RequestMakerBuilder {
        RequestMakerBuilder::new(provider, store, telemetry)
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Shared breaker record as currently stored. Never writes.
    pub async fn breaker_record(&self) -> Result<BreakerRecord, StoreError> {
        self.store.read(&self.provider).await
    }

    /// Perform `request` if the provider's circuit allows it.
    ///
    /// Returns the response on success, [`RequestError::CircuitOpen`] when the call
    /// was not attempted and [`RequestError::RequestFailed`] when it was attempted
    /// and failed. Exactly one telemetry entry is recorded either way.
    pub async fn request(
        &self,
        request: HttpRequest,
        correlation_id: Option<CorrelationId>,
    ) -> Result<HttpResponse, RequestError> {
        let correlation_id = correlation_id.unwrap_or_default();
        let started_at = self.clock.now();
        let started = Instant::now();
        let mut entry = TelemetryEntry {
            correlation_id: correlation_id.clone(),
            provider_id: self.provider.clone(),
            http_method: request.method,
            endpoint: request.url.to_string(),
            started_at,
            duration: Duration::ZERO,
            outcome: TelemetryOutcome::ShortCircuited,
            status_code: None,
            error_kind: None,
            error_message: None,
            breaker_state: None,
            request_headers: redact_headers(&request.headers),
            request_payload: request.body.as_deref().and_then(excerpt),
            response_headers: BTreeMap::new(),
            response_excerpt: None,
        };

        let admitted = match self.admit(&correlation_id).await {
            Ok(admitted) => admitted,
            Err(Rejection::ShortCircuit { error, observed }) => {
                tracing::debug!(
                    provider = %self.provider,
                    correlation_id = %correlation_id,
                    reason = error.reason.as_str(),
                    "short-circuited"
                );
                entry.breaker_state = observed;
                entry.error_kind = Some(error.reason.as_str().to_owned());
                entry.error_message = Some(error.to_string());
                entry.duration = started.elapsed();
                self.telemetry.record(entry);
                return Err(RequestError::CircuitOpen(error));
            }
            Err(Rejection::Corrupt(reason)) => {
                tracing::error!(
                    provider = %self.provider,
                    correlation_id = %correlation_id,
                    reason = %reason,
                    "corrupt breaker record"
                );
                entry.error_kind = Some(String::from("corrupt_record"));
                entry.error_message = Some(reason.clone());
                entry.duration = started.elapsed();
                self.telemetry.record(entry);
                return Err(RequestError::Corrupt {
                    provider: self.provider.clone(),
                    reason,
                });
            }
        };
        entry.breaker_state = Some(admitted.observed);

        let result = self.execute(request, admitted.trial.is_some()).await;
        entry.duration = started.elapsed();
        if let Ok(response) = &result {
            entry.response_headers = redact_headers(&response.headers);
        }

        let (outcome, result) = self.classify(result);
        let settled = self.settle(outcome, admitted.trial, &correlation_id).await;

        match &result {
            Ok(response) => {
                entry.outcome = TelemetryOutcome::Success;
                entry.status_code = Some(response.status);
                entry.response_excerpt = excerpt(&response.body);
            }
            Err(FailureCause::Status { status, body }) => {
                entry.outcome = TelemetryOutcome::Failure;
                entry.status_code = Some(*status);
                entry.error_kind = Some(String::from("http_status"));
                entry.error_message = Some(format!("upstream returned status {status}"));
                entry.response_excerpt = excerpt(body);
            }
            Err(FailureCause::Transport(error)) => {
                entry.outcome = TelemetryOutcome::Failure;
                entry.error_kind = Some(error.kind().as_str().to_owned());
                entry.error_message = Some(error.message().to_owned());
            }
        }
        self.telemetry.record(entry);

        if let Err(reason) = settled {
            return Err(RequestError::Corrupt {
                provider: self.provider.clone(),
                reason,
            });
        }

        result.map_err(|cause| {
            RequestError::RequestFailed(RequestFailedError {
                provider: self.provider.clone(),
                cause,
            })
        })
    }

    async fn admit(&self, correlation_id: &CorrelationId) -> Result<Admitted, Rejection> {
        let policy = self.settings.cas_retry;
        let mut observed = None;

        for attempt in 0..policy.max_attempts {
            let record = self
                .store
                .read(&self.provider)
                .await
                .map_err(|error| self.store_rejection(error, observed))?;
            observed = Some(record.state);

            let claim = match self.breaker.admit(&record, self.clock.now()) {
                Admission::Proceed => {
                    return Ok(Admitted {
                        observed: record.state,
                        trial: None,
                    })
                }
                Admission::Reject {
                    reason,
                    retry_after,
                } => {
                    return Err(Rejection::ShortCircuit {
                        error: self.open_error(reason, retry_after),
                        observed,
                    })
                }
                Admission::ClaimTrial(claim) => claim,
            };

            match self
                .store
                .compare_and_swap(&self.provider, record.version, &claim)
                .await
            {
                Ok(CasOutcome::Swapped(stored)) => {
                    tracing::info!(
                        provider = %self.provider,
                        correlation_id = %correlation_id,
                        from = %record.state,
                        version = stored.version,
                        "trial call claimed"
                    );
                    return Ok(Admitted {
                        observed: stored.state,
                        trial: stored.trial_claimed_at,
                    });
                }
                Ok(CasOutcome::Conflict) => {
                    tracing::debug!(
                        provider = %self.provider,
                        correlation_id = %correlation_id,
                        attempt = attempt + 1,
                        "trial claim lost a race; re-reading"
                    );
                    if attempt + 1 < policy.max_attempts {
                        policy.pause(attempt).await;
                    }
                }
                Err(error) => return Err(self.store_rejection(error, observed)),
            }
        }

        tracing::warn!(
            provider = %self.provider,
            correlation_id = %correlation_id,
            attempts = policy.max_attempts,
            "breaker claim kept conflicting; failing closed"
        );
        Err(Rejection::ShortCircuit {
            error: self.open_error(ShortCircuitReason::StoreUnavailable, None),
            observed,
        })
    }

    /// Trial calls never run past the configured request timeout, so they always
    /// finish inside the trial lease.
    async fn execute(
        &self,
        mut request: HttpRequest,
        trial: bool,
    ) -> Result<HttpResponse, HttpError> {
        let configured = self.settings.request_timeout;
        let timeout = match request.timeout {
            Some(requested) if trial => requested.min(configured),
            Some(requested) => requested,
            None => configured,
        };
        request.timeout = Some(timeout);
        match tokio::time::timeout(timeout, self.http.execute(request)).await {
            Ok(result) => result,
            Err(_) => Err(HttpError::timeout(format!(
                "no response within {}ms",
                timeout.as_millis()
            ))),
        }
    }

    fn classify(
        &self,
        result: Result<HttpResponse, HttpError>,
    ) -> (CallOutcome, Result<HttpResponse, FailureCause>) {
        match result {
            Ok(response) if self.settings.failure_statuses.contains(response.status) => (
                CallOutcome::Failure,
                Err(FailureCause::Status {
                    status: response.status,
                    body: response.body,
                }),
            ),
            Ok(response) => (CallOutcome::Success, Ok(response)),
            Err(error) => (CallOutcome::Failure, Err(FailureCause::Transport(error))),
        }
    }

    /// Fold `outcome` into the shared record. Conflicts are retried on a fresh read.
    ///
    /// Store trouble is logged, not returned: the call already happened. Only a
    /// corrupt record is reported back.
    async fn settle(
        &self,
        outcome: CallOutcome,
        trial: Option<UtcDateTime>,
        correlation_id: &CorrelationId,
    ) -> Result<(), String> {
        let policy = self.settings.cas_retry;

        for attempt in 0..policy.max_attempts {
            let current = match self.store.read(&self.provider).await {
                Ok(record) => record,
                Err(StoreError::Corrupt { reason, .. }) => return Err(reason),
                Err(error) => {
                    self.log_unsettled(correlation_id, outcome, &error.to_string());
                    return Ok(());
                }
            };

            let next = self
                .breaker
                .apply_outcome(&current, outcome, trial, self.clock.now());
            match self
                .store
                .compare_and_swap(&self.provider, current.version, &next)
                .await
            {
                Ok(CasOutcome::Swapped(stored)) => {
                    self.log_transition(&current, &stored, correlation_id);
                    return Ok(());
                }
                Ok(CasOutcome::Conflict) => {
                    tracing::debug!(
                        provider = %self.provider,
                        correlation_id = %correlation_id,
                        attempt = attempt + 1,
                        version = current.version,
                        "breaker update conflicted; re-reading"
                    );
                    if attempt + 1 < policy.max_attempts {
                        policy.pause(attempt).await;
                    }
                }
                Err(StoreError::Corrupt { reason, .. }) => return Err(reason),
                Err(error) => {
                    self.log_unsettled(correlation_id, outcome, &error.to_string());
                    return Ok(());
                }
            }
        }

        self.log_unsettled(
            correlation_id,
            outcome,
            &format!("{} conflicting attempts", policy.max_attempts),
        );
        Ok(())
    }

    fn log_transition(
        &self,
        from: &BreakerRecord,
        to: &BreakerRecord,
        correlation_id: &CorrelationId,
    ) {
        match (from.state, to.state) {
            (previous, CircuitState::Open) if previous != CircuitState::Open => tracing::warn!(
                provider = %self.provider,
                correlation_id = %correlation_id,
                state = %to.state,
                failures = to.consecutive_failures,
                version = to.version,
                "circuit opened"
            ),
            (CircuitState::HalfOpen, CircuitState::Closed) => tracing::info!(
                provider = %self.provider,
                correlation_id = %correlation_id,
                state = %to.state,
                version = to.version,
                "circuit closed after successful trial"
            ),
            _ => tracing::trace!(
                provider = %self.provider,
                correlation_id = %correlation_id,
                state = %to.state,
                failures = to.consecutive_failures,
                version = to.version,
                "breaker updated"
            ),
        }
    }

    fn log_unsettled(&self, correlation_id: &CorrelationId, outcome: CallOutcome, detail: &str) {
        tracing::warn!(
            provider = %self.provider,
            correlation_id = %correlation_id,
            outcome = ?outcome,
            detail = %detail,
            "breaker state unavailable; outcome not recorded"
        );
    }

    fn store_rejection(&self, error: StoreError, observed: Option<CircuitState>) -> Rejection {
        match error {
            StoreError::Corrupt { reason, .. } => Rejection::Corrupt(reason),
            StoreError::Unavailable { message } => {
                tracing::warn!(
                    provider = %self.provider,
                    error = %message,
                    "breaker store unavailable; failing closed"
                );
                Rejection::ShortCircuit {
                    error: self.open_error(ShortCircuitReason::StoreUnavailable, None),
                    observed,
                }
            }
        }
    }

    fn open_error(
        &self,
        reason: ShortCircuitReason,
        retry_after: Option<Duration>,
    ) -> CircuitOpenError {
        CircuitOpenError {
            provider: self.provider.clone(),
            reason,
            retry_after,
        }
    }
}

impl std::fmt::Debug for RequestMaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestMaker")
            .field("provider", &self.provider)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RequestMaker`].
///
/// Store and telemetry are required. The HTTP client defaults to reqwest, the
/// clock to the system clock and the settings to [`ProviderSettings::default`].
pub struct RequestMakerBuilder {
    provider: ProviderId,
    store: Arc<dyn BreakerStore>,
    telemetry: Arc<TelemetryRecorder>,
    settings: ProviderSettings,
    http: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
}

impl RequestMakerBuilder {
    pub fn new(
        provider: ProviderId,
        store: Arc<dyn BreakerStore>,
        telemetry: Arc<TelemetryRecorder>,
    ) -> Self {
        Self {
            provider,
            store,
            telemetry,
            settings: ProviderSettings::default(),
            http: None,
            clock: None,
        }
    }

    pub fn with_settings(mut self, settings: ProviderSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerSettings) -> Self {
        self.settings.breaker = breaker;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.settings.request_timeout = timeout;
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> RequestMaker {
        RequestMaker {
            breaker: CircuitBreaker::new(self.settings.breaker)
                .with_trial_lease(self.settings.trial_lease()),
            provider: self.provider,
            settings: self.settings,
            http: self
                .http
                .unwrap_or_else(|| Arc::new(ReqwestHttpClient::new())),
            store: self.store,
            telemetry: self.telemetry,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }
    }
}

/// One [`RequestMaker`] per configured provider, sharing a store, recorder,
/// HTTP client and clock.
pub struct GatewayClients {
    config: GatewayConfig,
    makers: BTreeMap<ProviderId, RequestMaker>,
    store: Arc<dyn BreakerStore>,
    telemetry: Arc<TelemetryRecorder>,
    http: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
}

impl GatewayClients {
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn BreakerStore>,
        telemetry: Arc<TelemetryRecorder>,
        http: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let makers = config
            .providers
            .iter()
            .map(|(provider, settings)| {
                let maker =
                    RequestMaker::builder(provider.clone(), store.clone(), telemetry.clone())
                        .with_settings(settings.clone())
                        .with_http_client(http.clone())
                        .with_clock(clock.clone())
                        .build();
                (provider.clone(), maker)
            })
            .collect();

        Self {
            config,
            makers,
            store,
            telemetry,
            http,
            clock,
        }
    }

    /// Maker for a configured provider.
    pub fn get(&self, provider: &ProviderId) -> Option<&RequestMaker> {
        self.makers.get(provider)
    }

    /// Maker for any provider; unconfigured providers get the default settings.
    pub fn maker_for(&self, provider: &ProviderId) -> RequestMaker {
        RequestMaker::builder(provider.clone(), self.store.clone(), self.telemetry.clone())
            .with_settings(self.config.settings_for(provider))
            .with_http_client(self.http.clone())
            .with_clock(self.clock.clone())
            .build()
    }

    pub fn providers(&self) -> impl Iterator<Item = &ProviderId> {
        self.makers.keys()
    }

    pub fn telemetry(&self) -> &Arc<TelemetryRecorder> {
        &self.telemetry
    }
}

impl std::fmt::Debug for GatewayClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClients")
            .field("providers", &self.makers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
