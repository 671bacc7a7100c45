use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::task::JoinHandle;

use super::{TelemetryEntry, TelemetrySink};

/// Entries that may wait for the sink before new ones are dropped.
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 1_024;

/// Fire-and-forget telemetry writer.
///
/// `record` only enqueues. A background task drains the queue into the sink; sink
/// failures are logged and dropped. The queue is bounded: while the sink lags,
/// entries beyond its capacity are counted and discarded.
pub struct TelemetryRecorder {
    sender: Mutex<Option<Sender<TelemetryEntry>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    dropped: AtomicU64,
}

impl TelemetryRecorder {
    /// Start the drain task with [`DEFAULT_TELEMETRY_CAPACITY`]. Must be called
    /// inside a tokio runtime.
    pub fn spawn(sink: Arc<dyn TelemetrySink>) -> Self {
        Self::with_capacity(sink, DEFAULT_TELEMETRY_CAPACITY)
    }

    pub fn with_capacity(sink: Arc<dyn TelemetrySink>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<TelemetryEntry>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Err(error) = sink.append(&entry).await {
                    tracing::warn!(
                        provider = %entry.provider_id,
                        correlation_id = %entry.correlation_id,
                        outcome = %entry.outcome,
                        error = %error,
                        "dropping telemetry entry"
                    );
                }
            }
            tracing::debug!("telemetry recorder drained");
        });

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Entries discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue an entry. Never blocks and never fails the caller.
    pub fn record(&self, entry: TelemetryEntry) {
        let Ok(sender) = self.sender.lock() else {
            tracing::error!("telemetry sender mutex poisoned");
            return;
        };

        match sender.as_ref() {
            Some(sender) => match sender.try_send(entry) {
                Ok(()) => {}
                Err(TrySendError::Full(entry)) => {
                    let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    tracing::warn!(
                        correlation_id = %entry.correlation_id,
                        dropped,
                        "telemetry queue full; entry dropped"
                    );
                }
                Err(TrySendError::Closed(entry)) => tracing::warn!(
                    correlation_id = %entry.correlation_id,
                    "telemetry worker stopped; entry dropped"
                ),
            },
            None => tracing::warn!(
                correlation_id = %entry.correlation_id,
                "telemetry recorder closed; entry dropped"
            ),
        }
    }

    /// Stop accepting entries, flush what is queued and wait for the worker.
    pub async fn close(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }

        let worker = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                tracing::error!(error = %error, "telemetry worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for TelemetryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRecorder")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}
