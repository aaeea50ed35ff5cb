//! Duration-threshold monitoring for cooperative tasks
//!
//! [`Monitor::instrument`] wraps a future so that its wall-clock duration is
//! measured from creation to completion. The wrapper is transparent: it adds
//! no suspension points, never inspects or alters the inner output, and
//! preserves scheduling order. When the elapsed time strictly exceeds the
//! configured threshold, the registered handler is invoked synchronously with
//! a [`ThresholdEvent`] carrying the unit's name, its creation origin and the
//! measured duration - at most once per monitored invocation.
//!
//! Dropping a monitored future before completion is cancellation: elapsed
//! time up to the drop is still measured and subject to the same threshold.
//!
//! A panicking handler is caught and logged; it can never mask the inner
//! future's outcome.

use crate::origin::{self, Origin};
use serde::{Serialize, Serializer};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// How a monitored invocation ended.
///
/// The wrapper never looks inside the future's output, so a future that
/// resolves to an `Err` value still counts as `Completed` - the error
/// propagates to the caller untouched. `Cancelled` means the future was
/// dropped before it resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    Completed,
    Cancelled,
}

/// One over-threshold invocation, produced at most once per monitored unit
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdEvent {
    /// Stable display name of the unit of work
    pub unit_name: String,
    /// Call-stack snapshot captured when the unit was created
    pub origin: Origin,
    /// True wall-clock elapsed time, monotonic-clock based
    #[serde(rename = "duration_secs", serialize_with = "serialize_secs")]
    pub duration: Duration,
    /// Terminal state of the invocation
    pub outcome: OutcomeKind,
}

fn serialize_secs<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl ThresholdEvent {
    /// Elapsed time as float seconds
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Callback invoked synchronously when a monitored unit exceeds its threshold.
///
/// Runs on the polling thread; it should not block the scheduler for long.
pub type ThresholdHandler = Arc<dyn Fn(&ThresholdEvent) + Send + Sync>;

/// Sink for secondary warnings raised when a threshold handler itself fails.
pub type WarningSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Wraps futures with duration-threshold instrumentation
#[derive(Clone)]
pub struct Monitor {
    threshold: Duration,
    handler: ThresholdHandler,
    warning_sink: Option<WarningSink>,
}

impl Monitor {
    pub fn new(threshold: Duration, handler: ThresholdHandler) -> Self {
        Self {
            threshold,
            handler,
            warning_sink: None,
        }
    }

    /// Route handler failures to a warning sink in addition to the log, so
    /// they surface next to the events in a flushed report
    /// (see [`crate::report::Reporter::warning_sink`]).
    pub fn with_warning_sink(mut self, sink: WarningSink) -> Self {
        self.warning_sink = Some(sink);
        self
    }

    /// The threshold this monitor reports against
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Instrument a single future.
    ///
    /// The origin is captured here, at the creation site, at the current
    /// process-wide depth ([`origin::capture_depth`]), and the monotonic
    /// start timestamp is recorded immediately after.
    pub fn instrument<F: Future>(&self, name: impl Into<String>, future: F) -> Monitored<F> {
        Monitored::new(
            name.into(),
            future,
            self.threshold,
            Arc::clone(&self.handler),
            self.warning_sink.clone(),
        )
    }

    /// Turn a future factory into an instrumented factory.
    ///
    /// Each invocation of the returned factory creates the underlying future,
    /// captures a fresh origin and start timestamp, and yields a monitored
    /// future. Wrapping an already-instrumented factory composes; each
    /// monitor's threshold is evaluated independently.
    pub fn wrap<F, Fut>(&self, name: impl Into<String>, factory: F) -> impl Fn() -> Monitored<Fut>
    where
        F: Fn() -> Fut,
        Fut: Future,
    {
        let name = name.into();
        let monitor = self.clone();
        move || monitor.instrument(name.clone(), factory())
    }
}

/// A future under duration-threshold observation.
///
/// Resolves to exactly the inner future's output. Invocation lifecycle:
/// created, running, then completed or cancelled; the handler fires at most
/// once, on the terminal transition, and only when elapsed time strictly
/// exceeds the threshold.
pub struct Monitored<F: Future> {
    future: Pin<Box<F>>,
    name: String,
    origin: Origin,
    started: Instant,
    threshold: Duration,
    handler: ThresholdHandler,
    warning_sink: Option<WarningSink>,
    settled: bool,
}

impl<F: Future> Monitored<F> {
    fn new(
        name: String,
        future: F,
        threshold: Duration,
        handler: ThresholdHandler,
        warning_sink: Option<WarningSink>,
    ) -> Self {
        let origin = origin::capture_default();
        Self {
            future: Box::pin(future),
            name,
            origin,
            started: Instant::now(),
            threshold,
            handler,
            warning_sink,
            settled: false,
        }
    }

    /// Stable display name used in threshold events
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Origin captured when this unit was created
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    fn settle(&mut self, outcome: OutcomeKind) {
        if self.settled {
            return;
        }
        self.settled = true;

        let elapsed = self.started.elapsed();
        if elapsed <= self.threshold {
            return;
        }

        let event = ThresholdEvent {
            unit_name: self.name.clone(),
            origin: self.origin.clone(),
            duration: elapsed,
            outcome,
        };
        let handler = Arc::clone(&self.handler);
        if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
            tracing::warn!(
                unit = %event.unit_name,
                duration_secs = event.duration_secs(),
                "threshold handler panicked; original outcome preserved"
            );
            if let Some(sink) = &self.warning_sink {
                let warning = format!(
                    "threshold handler panicked while reporting unit '{}' ({:.3}s)",
                    event.unit_name,
                    event.duration_secs()
                );
                sink(&warning);
            }
        }
    }
}

impl<F: Future> Future for Monitored<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // The inner future is boxed, so Monitored itself is Unpin.
        let this = self.get_mut();
        match this.future.as_mut().poll(cx) {
            Poll::Ready(output) => {
                this.settle(OutcomeKind::Completed);
                Poll::Ready(output)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<F: Future> Drop for Monitored<F> {
    fn drop(&mut self) {
        self.settle(OutcomeKind::Cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting_handler() -> (ThresholdHandler, Arc<Mutex<Vec<ThresholdEvent>>>) {
        let events: Arc<Mutex<Vec<ThresholdEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let handler: ThresholdHandler =
            Arc::new(move |event| sink.lock().unwrap().push(event.clone()));
        (handler, events)
    }

    /// Future that is Pending on its first poll and Ready afterwards
    struct YieldOnce {
        yielded: bool,
        value: u32,
    }

    impl Future for YieldOnce {
        type Output = u32;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<u32> {
            if self.yielded {
                Poll::Ready(self.value)
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[tokio::test]
    async fn test_handler_fires_when_threshold_exceeded() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::ZERO, handler);

        let value = monitor
            .instrument("busy", async {
                std::thread::sleep(Duration::from_millis(2));
                42
            })
            .await;

        assert_eq!(value, 42);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].unit_name, "busy");
        assert_eq!(events[0].outcome, OutcomeKind::Completed);
        assert!(events[0].duration_secs() > 0.0);
    }

    #[tokio::test]
    async fn test_handler_silent_under_threshold() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::from_secs(60), handler);

        let value = monitor.instrument("quick", async { 7 }).await;

        assert_eq!(value, 7);
        assert!(events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_output_propagates_unchanged() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::ZERO, handler);

        let result: Result<u32, String> = monitor
            .instrument("failing", async {
                std::thread::sleep(Duration::from_millis(2));
                Err("boom".to_string())
            })
            .await;

        assert_eq!(result, Err("boom".to_string()));
        // Timing applies to failures too; the resolved future is Completed.
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, OutcomeKind::Completed);
    }

    #[tokio::test]
    async fn test_handler_fires_exactly_once_across_polls() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::ZERO, handler);

        let value = monitor
            .instrument(
                "yielding",
                YieldOnce {
                    yielded: false,
                    value: 5,
                },
            )
            .await;

        assert_eq!(value, 5);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_panic_preserves_outcome() {
        let handler: ThresholdHandler = Arc::new(|_| panic!("handler bug"));
        let monitor = Monitor::new(Duration::ZERO, handler);

        let value = monitor
            .instrument("observed", async {
                std::thread::sleep(Duration::from_millis(2));
                99
            })
            .await;

        assert_eq!(value, 99);
    }

    #[tokio::test]
    async fn test_handler_panic_surfaces_as_report_warning() {
        let reporter = Arc::new(crate::report::Reporter::new());
        let recorder = reporter.threshold_handler();
        let handler: ThresholdHandler = Arc::new(move |event| {
            recorder(event);
            panic!("handler bug");
        });
        let monitor =
            Monitor::new(Duration::ZERO, handler).with_warning_sink(reporter.warning_sink());

        let value = monitor
            .instrument("flaky-reported", async {
                std::thread::sleep(Duration::from_millis(2));
                11
            })
            .await;

        assert_eq!(value, 11);
        let report = reporter.flush();
        // The primary event survives; the handler failure rides along as a
        // secondary warning, never replacing it.
        assert_eq!(report.summary.threshold_event_count, 1);
        assert_eq!(report.threshold_events[0].unit_name, "flaky-reported");
        assert_eq!(report.handler_warnings.len(), 1);
        assert!(report.handler_warnings[0].contains("flaky-reported"));
    }

    #[tokio::test]
    async fn test_wrapping_composes() {
        let (outer_handler, outer_events) = collecting_handler();
        let (inner_handler, inner_events) = collecting_handler();
        let outer = Monitor::new(Duration::ZERO, outer_handler);
        let inner = Monitor::new(Duration::ZERO, inner_handler);

        let value = outer
            .instrument(
                "outer",
                inner.instrument("inner", async {
                    std::thread::sleep(Duration::from_millis(2));
                    1
                }),
            )
            .await;

        assert_eq!(value, 1);
        assert_eq!(outer_events.lock().unwrap().len(), 1);
        assert_eq!(inner_events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_wrap_creates_fresh_invocations() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::ZERO, handler);
        let factory = monitor.wrap("job", || async {
            std::thread::sleep(Duration::from_millis(2));
            3
        });

        assert_eq!(factory().await, 3);
        assert_eq!(factory().await, 3);
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_drop_before_completion_is_cancelled() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::ZERO, handler);

        let monitored = monitor.instrument("abandoned", std::future::pending::<()>());
        std::thread::sleep(Duration::from_millis(2));
        drop(monitored);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].outcome, OutcomeKind::Cancelled);
        assert!(events[0].duration_secs() > 0.0);
    }

    #[test]
    fn test_drop_under_threshold_is_silent() {
        let (handler, events) = collecting_handler();
        let monitor = Monitor::new(Duration::from_secs(60), handler);

        drop(monitor.instrument("short-lived", std::future::pending::<()>()));

        assert!(events.lock().unwrap().is_empty());
    }

    #[test]
    fn test_name_and_origin_accessors() {
        let (handler, _) = collecting_handler();
        let monitor = Monitor::new(Duration::from_secs(1), handler);
        let monitored = monitor.instrument("named", async {});

        assert_eq!(monitored.name(), "named");
        // Origin length is bounded by the process-wide depth.
        assert!(monitored.origin().len() <= crate::origin::capture_depth());
    }

    #[test]
    fn test_event_serializes_duration_as_secs() {
        let event = ThresholdEvent {
            unit_name: "job".to_string(),
            origin: Origin::empty(),
            duration: Duration::from_millis(1500),
            outcome: OutcomeKind::Completed,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"duration_secs\":1.5"));
        assert!(json.contains("\"outcome\":\"completed\""));
    }
}
