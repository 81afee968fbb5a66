use std::sync::Arc;

/// Structured, in-process event hook for observability.
///
/// This crate is a library; emitting logs directly (e.g. `println!`) is not
/// acceptable for production. Instead, callers can provide an implementation
/// that forwards these events to `tracing`, `log`, metrics, or custom sinks.
///
/// Every queued batch ends in exactly one [`BatchEvent::BatchSucceeded`] or
/// [`BatchEvent::BatchFailed`], whether the delivery succeeded on the first
/// attempt or on the single retry.
pub trait BatchEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: BatchEvent);
}

/// Structured events emitted by the batching engine.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    FlushThreadStarted,
    FlushThreadStopping,
    FlushThreadPanicked,

    /// A batch of `size` lines was accepted by the server.
    BatchSucceeded { size: usize },
    /// A batch of `size` lines was dropped after the retry budget (0 or 1
    /// retries) was exhausted.
    BatchFailed { size: usize, error: String },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl BatchEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: BatchEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn BatchEventListener> {
    Arc::new(NoopEventListener)
}
