//! In-memory span recorder.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use super::{SpanKind, Status, TraceBackend, TraceSpan};
use crate::attribute::AttributeSet;

/// Snapshot of a recorded span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanData {
    pub trace_id: u64,
    pub span_id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub kind: SpanKind,
    pub attributes: AttributeSet,
    pub status: Status,
    pub start_time: SystemTime,
    pub end_time: Option<SystemTime>,
}

#[derive(Debug, Default)]
struct Recorder {
    next_id: AtomicU64,
    started: AtomicUsize,
    ended: Mutex<Vec<SpanData>>,
}

impl Recorder {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Backend that keeps every span in memory.
///
/// Clones share the same recording, so a test can hand one clone to an
/// [`OpTracer`](crate::OpTracer) and inspect the other.
///
/// ```rust
/// use sea_orm_tx_tracing::{Context, InMemoryTracer, OpTracer, TracingConfig};
///
/// let recorder = InMemoryTracer::new();
/// let config = TracingConfig::builder("postgresql", "test_db").build().unwrap();
/// let tracer = OpTracer::new(config, recorder.clone());
///
/// let ctx = tracer.start(&Context::new(), "INSERT", &[]);
/// tracer.end(&ctx, "INSERT", None, &[]);
///
/// assert_eq!(recorder.ended_spans()[0].name, "INSERT test_db");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryTracer {
    recorder: Arc<Recorder>,
}

impl InMemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans that have ended, in the order they ended.
    pub fn ended_spans(&self) -> Vec<SpanData> {
        self.recorder.ended.lock().clone()
    }

    /// Number of spans started, ended or not.
    pub fn started_count(&self) -> usize {
        self.recorder.started.load(Ordering::Relaxed)
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.recorder.started.store(0, Ordering::Relaxed);
        self.recorder.ended.lock().clear();
    }
}

impl TraceBackend for InMemoryTracer {
    type Span = RecordedSpan;

    fn start_span(&self, parent: Option<&RecordedSpan>, name: &str, kind: SpanKind) -> RecordedSpan {
        let span_id = self.recorder.next_id();
        let (trace_id, parent_id) = match parent {
            Some(parent) => {
                let parent = parent.data.lock();
                (parent.trace_id, Some(parent.span_id))
            }
            None => (self.recorder.next_id(), None),
        };
        self.recorder.started.fetch_add(1, Ordering::Relaxed);

        RecordedSpan {
            data: Arc::new(Mutex::new(SpanData {
                trace_id,
                span_id,
                parent_id,
                name: name.to_string(),
                kind,
                attributes: AttributeSet::new(),
                status: Status::Unset,
                start_time: SystemTime::now(),
                end_time: None,
            })),
            recorder: self.recorder.clone(),
        }
    }
}

/// Live handle to a span recorded by [`InMemoryTracer`].
#[derive(Debug, Clone)]
pub struct RecordedSpan {
    data: Arc<Mutex<SpanData>>,
    recorder: Arc<Recorder>,
}

impl RecordedSpan {
    /// Current state of the span.
    pub fn snapshot(&self) -> SpanData {
        self.data.lock().clone()
    }
}

impl TraceSpan for RecordedSpan {
    fn set_attributes(&self, attributes: &AttributeSet) {
        let mut data = self.data.lock();
        if data.end_time.is_none() {
            data.attributes.merge(attributes);
        }
    }

    fn set_ok_status(&self) {
        let mut data = self.data.lock();
        if data.end_time.is_none() {
            data.status = Status::Ok;
        }
    }

    fn set_error_status(&self, message: &str) {
        let mut data = self.data.lock();
        if data.end_time.is_none() {
            data.status = Status::error(message.to_string());
        }
    }

    fn end(&self) {
        let mut data = self.data.lock();
        if data.end_time.is_some() {
            return;
        }
        data.end_time = Some(SystemTime::now());
        self.recorder.ended.lock().push(data.clone());
    }
}
