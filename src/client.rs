//! Client API and the background batching engine: queue, flush thread,
//! fire-and-forget delivery with a single retry, and teardown.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::encoding::encode_measurement;
use crate::error::InfluxError;
use crate::telemetry::{noop_event_listener, BatchEvent, BatchEventListener};
use crate::transport::{HttpTransport, SendResult};
use crate::types::{Measurement, ProtocolVersion, TimestampResolution};

/// Default number of lines per batch.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 5000;
/// Default time-based flush interval.
pub const DEFAULT_MAX_BATCH_INTERVAL: Duration = Duration::from_secs(10);
/// Default delay before the single delivery retry.
pub const DEFAULT_BATCH_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Cadence of the periodic background tick. The tick is fixed; the configured
/// flush interval is evaluated against a stopwatch on every tick.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Commands sent to the background flush thread.
enum FlushCommand {
    Flush {
        force: bool,
        ack: Option<mpsc::Sender<Result<(), InfluxError>>>,
    },
    Shutdown,
}

/// Queue plus the runtime-mutable batch settings. One lock guards both so a
/// flush decision always sees a consistent snapshot of the settings.
struct BatchState {
    queue: VecDeque<String>,
    max_batch_size: usize,
    max_batch_interval: Option<Duration>,
    batch_retry_interval: Option<Duration>,
    /// Time since the last drain, or since the queue was last observed empty
    /// by the tick (idle time never counts toward the interval).
    stopwatch: Instant,
}

/// Client interface for InfluxDB. Thread safe.
///
/// Protocol version, timestamp resolution, server URL, organization, bucket
/// and token are fixed at construction; the batch settings can be changed at
/// runtime through the `set_*` methods.
#[derive(Debug)]
pub struct InfluxClient {
    server_url: reqwest::Url,
    organization: Option<String>,
    bucket: String,
    token: Option<String>,
    version: ProtocolVersion,
    resolution: TimestampResolution,

    transport: Arc<HttpTransport>,
    listener: Arc<dyn BatchEventListener>,
    batch: Arc<Mutex<BatchState>>,
    flush_cmd_tx: mpsc::Sender<FlushCommand>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl std::fmt::Debug for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchState")
            .field("queued", &self.queue.len())
            .field("max_batch_size", &self.max_batch_size)
            .field("max_batch_interval", &self.max_batch_interval)
            .field("batch_retry_interval", &self.batch_retry_interval)
            .finish()
    }
}

impl InfluxClient {
    /// Creates a new client.
    ///
    /// `server_url` must be an http or https URL; `bucket` must be non-empty.
    /// Batch events are discarded; use [`InfluxClient::with_listener`] to
    /// observe them.
    pub fn new(
        server_url: &str,
        organization: Option<&str>,
        bucket: &str,
        token: Option<&str>,
        version: ProtocolVersion,
        resolution: TimestampResolution,
    ) -> Result<Self, InfluxError> {
        Self::with_listener(
            server_url,
            organization,
            bucket,
            token,
            version,
            resolution,
            noop_event_listener(),
        )
    }

    /// Creates a new client with a structured event hook for batch outcomes.
    #[allow(clippy::too_many_arguments)]
    pub fn with_listener(
        server_url: &str,
        organization: Option<&str>,
        bucket: &str,
        token: Option<&str>,
        version: ProtocolVersion,
        resolution: TimestampResolution,
        listener: Arc<dyn BatchEventListener>,
    ) -> Result<Self, InfluxError> {
        let server_url = reqwest::Url::parse(server_url)
            .map_err(|e| InfluxError::ConfigError(format!("Invalid server URL: {}", e)))?;
        if server_url.scheme() != "http" && server_url.scheme() != "https" {
            return Err(InfluxError::ConfigError(
                "Server URL must be either HTTP or HTTPS".to_string(),
            ));
        }
        if bucket.trim().is_empty() {
            return Err(InfluxError::ConfigError(
                "Bucket cannot be empty".to_string(),
            ));
        }

        let mut write_url = server_url
            .join("/api/v2/write")
            .map_err(|e| InfluxError::ConfigError(format!("Invalid server URL: {}", e)))?;
        {
            // The org parameter is always present, empty when unset.
            let mut query = write_url.query_pairs_mut();
            query.append_pair("org", organization.unwrap_or(""));
            query.append_pair("bucket", bucket);
            if let Some(unit) = resolution.query_unit() {
                query.append_pair("precision", unit);
            }
        }

        let transport = Arc::new(HttpTransport::new(
            write_url,
            token.map(str::to_string),
        ));

        let batch = Arc::new(Mutex::new(BatchState {
            queue: VecDeque::new(),
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_batch_interval: Some(DEFAULT_MAX_BATCH_INTERVAL),
            batch_retry_interval: Some(DEFAULT_BATCH_RETRY_INTERVAL),
            stopwatch: Instant::now(),
        }));

        let (flush_cmd_tx, flush_cmd_rx) = mpsc::channel::<FlushCommand>();

        // Clones for the background flush thread.
        let batch_clone = Arc::clone(&batch);
        let transport_clone = Arc::clone(&transport);
        let events = Arc::clone(&listener);

        let flush_handle = thread::Builder::new()
            .name("influxline-flush".to_string())
            .spawn(move || {
                events.on_event(BatchEvent::FlushThreadStarted);
                let mut next_tick = Instant::now() + TICK_INTERVAL;
                loop {
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    match flush_cmd_rx.recv_timeout(wait) {
                        Ok(FlushCommand::Flush { force, ack }) => {
                            let res = drain_queue(&batch_clone, &transport_clone, &events, force);
                            if let Some(ack) = ack {
                                let _ = ack.send(res);
                            }
                        }
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        // Shutdown command, or the client was dropped without
                        // an explicit shutdown: one final forced drain.
                        Ok(FlushCommand::Shutdown) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            let _ = drain_queue(&batch_clone, &transport_clone, &events, true);
                            events.on_event(BatchEvent::FlushThreadStopping);
                            break;
                        }
                    }
                    // The tick runs on its own deadline, so a steady stream of
                    // flush commands cannot postpone interval flushes.
                    if Instant::now() >= next_tick {
                        tick(&batch_clone, &transport_clone, &events);
                        next_tick = Instant::now() + TICK_INTERVAL;
                    }
                }
            })
            .map_err(|e| {
                InfluxError::BackgroundTaskError(format!("Failed to spawn flush thread: {}", e))
            })?;

        Ok(InfluxClient {
            server_url,
            organization: organization.map(str::to_string),
            bucket: bucket.to_string(),
            token: token.map(str::to_string),
            version,
            resolution,
            transport,
            listener,
            batch,
            flush_cmd_tx,
            flush_handle: Mutex::new(Some(flush_handle)),
            disposed: AtomicBool::new(false),
        })
    }

    /// v1 client: no organization, nanosecond resolution, lenient protocol.
    pub fn v1(server_url: &str, bucket: &str) -> Result<Self, InfluxError> {
        Self::new(
            server_url,
            None,
            bucket,
            None,
            ProtocolVersion::V1,
            TimestampResolution::Nanoseconds,
        )
    }

    /// v1 client with an auth token.
    pub fn v1_with_token(
        server_url: &str,
        bucket: &str,
        token: Option<&str>,
    ) -> Result<Self, InfluxError> {
        Self::new(
            server_url,
            None,
            bucket,
            token,
            ProtocolVersion::V1,
            TimestampResolution::Nanoseconds,
        )
    }

    /// v2 client with nanosecond resolution.
    pub fn v2(
        server_url: &str,
        organization: Option<&str>,
        bucket: &str,
        token: Option<&str>,
    ) -> Result<Self, InfluxError> {
        Self::new(
            server_url,
            organization,
            bucket,
            token,
            ProtocolVersion::V2,
            TimestampResolution::Nanoseconds,
        )
    }

    pub fn server_url(&self) -> &str {
        self.server_url.as_str()
    }

    pub fn organization(&self) -> Option<&str> {
        self.organization.as_deref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn resolution(&self) -> TimestampResolution {
        self.resolution
    }

    pub fn max_batch_size(&self) -> usize {
        lock_recovered(&self.batch).max_batch_size
    }

    /// Sets the batch size threshold; valid range is 1..=100_000.
    pub fn set_max_batch_size(&self, value: usize) -> Result<(), InfluxError> {
        self.ensure_live()?;
        if value < 1 {
            return Err(InfluxError::ConfigError(
                "Cannot have maximum batch size smaller than 1".to_string(),
            ));
        }
        if value > 100_000 {
            return Err(InfluxError::ConfigError(
                "Cannot have maximum batch size larger than 100,000".to_string(),
            ));
        }
        self.batch.lock()?.max_batch_size = value;
        Ok(())
    }

    pub fn max_batch_interval(&self) -> Option<Duration> {
        lock_recovered(&self.batch).max_batch_interval
    }

    /// Sets the time-based flush interval; `None` disables interval flushing.
    /// Valid range is 1 second to 1 hour.
    pub fn set_max_batch_interval(&self, value: Option<Duration>) -> Result<(), InfluxError> {
        self.ensure_live()?;
        if let Some(interval) = value {
            if interval < Duration::from_secs(1) || interval > Duration::from_secs(3600) {
                return Err(InfluxError::ConfigError(
                    "Batch interval must be between 1 second and 1 hour, or disabled".to_string(),
                ));
            }
        }
        self.batch.lock()?.max_batch_interval = value;
        Ok(())
    }

    pub fn batch_retry_interval(&self) -> Option<Duration> {
        lock_recovered(&self.batch).batch_retry_interval
    }

    /// Sets the delay before the single retry of a failed batch; `None`
    /// disables the retry. Valid range is 1 second to 1 hour.
    pub fn set_batch_retry_interval(&self, value: Option<Duration>) -> Result<(), InfluxError> {
        self.ensure_live()?;
        if let Some(interval) = value {
            if interval < Duration::from_secs(1) || interval > Duration::from_secs(3600) {
                return Err(InfluxError::ConfigError(
                    "Batch retry interval must be between 1 second and 1 hour, or disabled"
                        .to_string(),
                ));
            }
        }
        self.batch.lock()?.batch_retry_interval = value;
        Ok(())
    }

    /// Immediately sends one measurement; blocks until the outcome is known.
    ///
    /// Delivery problems come back as a failed [`SendResult`], never as an
    /// `Err`. `Err` means the call itself was invalid (render error, disposed
    /// client).
    pub fn send(&self, measurement: &Measurement) -> Result<SendResult, InfluxError> {
        self.ensure_live()?;
        let mut body = encode_measurement(measurement, self.version, self.resolution)?;
        body.push('\n');
        Ok(self.transport.send(&body))
    }

    /// Immediately sends a group of measurements as one request body.
    pub fn send_many(&self, measurements: &[Measurement]) -> Result<SendResult, InfluxError> {
        let body = self.render_body(measurements)?;
        Ok(self.transport.send(&body))
    }

    /// Async variant of [`InfluxClient::send`]; the caller supplies the
    /// runtime.
    pub async fn send_async(&self, measurement: &Measurement) -> Result<SendResult, InfluxError> {
        self.ensure_live()?;
        let mut body = encode_measurement(measurement, self.version, self.resolution)?;
        body.push('\n');
        Ok(self.transport.send_async(&body).await)
    }

    /// Async variant of [`InfluxClient::send_many`].
    pub async fn send_many_async(
        &self,
        measurements: &[Measurement],
    ) -> Result<SendResult, InfluxError> {
        let body = self.render_body(measurements)?;
        Ok(self.transport.send_async(&body).await)
    }

    /// Queues one measurement for background delivery.
    pub fn queue(&self, measurement: &Measurement) -> Result<(), InfluxError> {
        self.queue_many(std::slice::from_ref(measurement))
    }

    /// Queues measurements for background delivery.
    ///
    /// Measurements are rendered here, so validation and render errors
    /// surface synchronously; on error nothing is queued. The delivery itself
    /// is triggered in the background and this call never blocks on network
    /// I/O. Outcomes are reported through the event listener, one event per
    /// batch.
    pub fn queue_many(&self, measurements: &[Measurement]) -> Result<(), InfluxError> {
        self.ensure_live()?;
        if measurements.is_empty() {
            return Err(InfluxError::EmptyBatch);
        }
        let mut lines = Vec::with_capacity(measurements.len());
        for measurement in measurements {
            lines.push(encode_measurement(measurement, self.version, self.resolution)?);
        }
        self.batch.lock()?.queue.extend(lines);
        // Non-forced flush attempt; the background thread applies the size
        // threshold.
        self.flush_cmd_tx
            .send(FlushCommand::Flush {
                force: false,
                ack: None,
            })
            .map_err(|e| {
                InfluxError::BackgroundTaskError(format!("Failed to send flush command: {}", e))
            })?;
        Ok(())
    }

    /// Forces a flush of the queue, bypassing the size threshold.
    ///
    /// Blocks until the queue has been drained and the batches handed to
    /// delivery tasks; does not wait for the deliveries themselves.
    pub fn flush(&self) -> Result<(), InfluxError> {
        self.ensure_live()?;
        let (tx, rx) = mpsc::channel();
        self.flush_cmd_tx
            .send(FlushCommand::Flush {
                force: true,
                ack: Some(tx),
            })
            .map_err(|e| {
                InfluxError::BackgroundTaskError(format!("Failed to send flush command: {}", e))
            })?;
        rx.recv().map_err(|e| {
            InfluxError::BackgroundTaskError(format!("Failed to receive flush ack: {}", e))
        })?
    }

    /// Shuts the client down: drains the queue (forced), stops the periodic
    /// tick, and marks the client unusable. Any later call fails with
    /// [`InfluxError::Disposed`]. Deliveries already in flight are not
    /// awaited; they finish (and report) on their own.
    pub fn shutdown(&self) -> Result<(), InfluxError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(InfluxError::Disposed);
        }
        let _ = self.flush_cmd_tx.send(FlushCommand::Shutdown);
        if let Some(handle) = self.flush_handle.lock()?.take() {
            if handle.join().is_err() {
                self.listener.on_event(BatchEvent::FlushThreadPanicked);
                return Err(InfluxError::BackgroundTaskError(
                    "Flush thread panicked".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), InfluxError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(InfluxError::Disposed);
        }
        Ok(())
    }

    fn render_body(&self, measurements: &[Measurement]) -> Result<String, InfluxError> {
        self.ensure_live()?;
        if measurements.is_empty() {
            return Err(InfluxError::EmptyBatch);
        }
        let mut body = String::with_capacity(measurements.len() * 256);
        for measurement in measurements {
            body.push_str(&encode_measurement(measurement, self.version, self.resolution)?);
            body.push('\n');
        }
        Ok(body)
    }
}

/// Gracefully stop the background flush thread on drop.
impl Drop for InfluxClient {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

fn lock_recovered(batch: &Mutex<BatchState>) -> std::sync::MutexGuard<'_, BatchState> {
    match batch.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Periodic tick: reset the stopwatch while the queue is idle, otherwise
/// force a drain once the configured interval has elapsed.
fn tick(
    batch: &Arc<Mutex<BatchState>>,
    transport: &Arc<HttpTransport>,
    events: &Arc<dyn BatchEventListener>,
) {
    let interval_elapsed = {
        let mut state = lock_recovered(batch);
        if state.queue.is_empty() {
            // Don't count seconds without anything in the queue.
            state.stopwatch = Instant::now();
            return;
        }
        match state.max_batch_interval {
            Some(interval) => state.stopwatch.elapsed() >= interval,
            None => false,
        }
    };
    if interval_elapsed {
        let _ = drain_queue(batch, transport, events, true);
    }
}

/// Drains the queue into batches of at most `max_batch_size` lines and
/// dispatches each batch to a detached delivery thread. Without `force`,
/// nothing happens until the queue has reached the size threshold. Extraction
/// repeats until the remaining queue size drops below the threshold, so a
/// backlog drains in multiple batches.
fn drain_queue(
    batch: &Arc<Mutex<BatchState>>,
    transport: &Arc<HttpTransport>,
    events: &Arc<dyn BatchEventListener>,
    force: bool,
) -> Result<(), InfluxError> {
    loop {
        let (body, size, retry_interval) = {
            let mut state = batch.lock()?;
            if state.queue.is_empty() {
                return Ok(());
            }
            if !force && state.queue.len() < state.max_batch_size {
                return Ok(());
            }
            let take = state.max_batch_size.min(state.queue.len());
            let mut body = String::with_capacity(take * 256);
            for line in state.queue.drain(..take) {
                body.push_str(&line);
                body.push('\n');
            }
            // Settings are snapshotted under the lock; changes mid-flight
            // never affect a batch already extracted.
            let retry_interval = state.batch_retry_interval;
            state.stopwatch = Instant::now();
            (body, take, retry_interval)
        };

        deliver_detached(
            Arc::clone(transport),
            Arc::clone(events),
            body,
            size,
            retry_interval,
        );

        let backlog_remains = {
            let state = batch.lock()?;
            state.queue.len() >= state.max_batch_size
        };
        if !backlog_remains {
            return Ok(());
        }
    }
}

/// Fire-and-forget delivery of one batch: send, optionally retry once after
/// the configured delay, then report exactly one success-or-failure event.
fn deliver_detached(
    transport: Arc<HttpTransport>,
    events: Arc<dyn BatchEventListener>,
    body: String,
    size: usize,
    retry_interval: Option<Duration>,
) {
    let events_for_task = Arc::clone(&events);
    let spawned = thread::Builder::new()
        .name("influxline-deliver".to_string())
        .spawn(move || {
            let mut result = transport.send(&body);
            if !result.is_success() {
                if let Some(delay) = retry_interval {
                    thread::sleep(delay);
                    result = transport.send(&body);
                }
            }
            if result.is_success() {
                events_for_task.on_event(BatchEvent::BatchSucceeded { size });
            } else {
                events_for_task.on_event(BatchEvent::BatchFailed {
                    size,
                    error: result.error_text().unwrap_or_default().to_string(),
                });
            }
        });
    if spawned.is_err() {
        // Could not spawn a delivery thread; the batch is lost, report it.
        events.on_event(BatchEvent::BatchFailed {
            size,
            error: "Failed to spawn delivery thread".to_string(),
        });
    }
}
