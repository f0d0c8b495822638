//! # Log Capture
//!
//! A `tracing_subscriber` layer that keeps the most recent structured
//! records in memory so the correlator and the logs endpoint can read them
//! back.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;

/// Log type for ordinary application records
pub const RUNTIME_LOG_TYPE: &str = "runtime";

/// One captured tracing event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// Monotonic, starts at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// `ERROR`, `WARN`, `INFO`, `DEBUG` or `TRACE`
    pub level: String,
    /// Tracing target, usually the module path
    pub logger: String,
    pub message: String,
    pub log_type: String,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    /// Remaining structured fields
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl LogRecord {
    pub fn new(level: &str, logger: &str, message: impl Into<String>) -> Self {
        Self {
            sequence: 0,
            timestamp: Utc::now(),
            level: level.to_string(),
            logger: logger.to_string(),
            message: message.into(),
            log_type: RUNTIME_LOG_TYPE.to_string(),
            run_id: None,
            event: None,
            payload: Map::new(),
        }
    }

    pub fn with_event(mut self, event: &str) -> Self {
        self.event = Some(event.to_string());
        self
    }

    pub fn with_run_id(mut self, run_id: &str) -> Self {
        self.run_id = Some(run_id.to_string());
        self
    }

    pub fn with_log_type(mut self, log_type: &str) -> Self {
        self.log_type = log_type.to_string();
        self
    }

    pub fn with_payload(mut self, key: &str, value: Value) -> Self {
        self.payload.insert(key.to_string(), value);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Page of records returned by [`LogBuffer::records_after`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogPage {
    pub records: Vec<LogRecord>,
    /// Sequence of the last returned record, or the cursor passed in
    pub cursor: u64,
}

struct BufferInner {
    records: VecDeque<LogRecord>,
    next_sequence: u64,
}

/// Bounded ring buffer of captured records
pub struct LogBuffer {
    capacity: usize,
    session_started_at: DateTime<Utc>,
    inner: Mutex<BufferInner>,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            session_started_at: Utc::now(),
            inner: Mutex::new(BufferInner {
                records: VecDeque::new(),
                next_sequence: 1,
            }),
        }
    }

    // A panic while holding the lock leaves the ring in a consistent state,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn session_started_at(&self) -> DateTime<Utc> {
        self.session_started_at
    }

    /// Append a record, assigning its sequence number. Returns the sequence.
    pub fn push(&self, mut record: LogRecord) -> u64 {
        let mut inner = self.lock();
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        record.sequence = sequence;
        if inner.records.len() == self.capacity {
            inner.records.pop_front();
        }
        inner.records.push_back(record);
        sequence
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every retained record, oldest first
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().records.iter().cloned().collect()
    }

    /// The most recent `limit` records of `log_type` (all types when `None`),
    /// oldest first
    pub fn recent(&self, limit: usize, log_type: Option<&str>) -> Vec<LogRecord> {
        let inner = self.lock();
        let mut records: Vec<LogRecord> = inner
            .records
            .iter()
            .rev()
            .filter(|record| matches_type(record, log_type))
            .take(limit)
            .cloned()
            .collect();
        records.reverse();
        records
    }

    /// Records with a sequence greater than `cursor`, oldest first, at most
    /// `limit` of them.
    pub fn records_after(&self, cursor: u64, limit: usize, log_type: Option<&str>) -> LogPage {
        let inner = self.lock();
        let records: Vec<LogRecord> = inner
            .records
            .iter()
            .filter(|record| record.sequence > cursor && matches_type(record, log_type))
            .take(limit)
            .cloned()
            .collect();
        let cursor = records.last().map(|record| record.sequence).unwrap_or(cursor);
        LogPage { records, cursor }
    }

    pub fn clear(&self) {
        self.lock().records.clear();
    }
}

fn matches_type(record: &LogRecord, log_type: Option<&str>) -> bool {
    log_type.map_or(true, |wanted| record.log_type.eq_ignore_ascii_case(wanted))
}

// ============================================================================
// Layer
// ============================================================================

/// Collects event fields into a [`LogRecord`]
#[derive(Default)]
struct RecordVisitor {
    message: Option<String>,
    event: Option<String>,
    run_id: Option<String>,
    log_type: Option<String>,
    payload: Map<String, Value>,
}

impl RecordVisitor {
    fn store(&mut self, field: &Field, value: Value) {
        let slot = match field.name() {
            "message" => &mut self.message,
            "event" => &mut self.event,
            "run_id" => &mut self.run_id,
            "log_type" => &mut self.log_type,
            name => {
                self.payload.insert(name.to_string(), value);
                return;
            }
        };
        *slot = Some(match value {
            Value::String(text) => text,
            other => other.to_string(),
        });
    }
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.store(field, Value::Bool(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.store(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.store(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.store(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, Value::String(format!("{:?}", value)));
    }
}

/// Feeds every tracing event into a shared [`LogBuffer`].
#[derive(Clone)]
pub struct LogCaptureLayer {
    buffer: Arc<LogBuffer>,
}

impl LogCaptureLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> Arc<LogBuffer> {
        self.buffer.clone()
    }
}

impl<S> tracing_subscriber::Layer<S> for LogCaptureLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let record = LogRecord {
            sequence: 0,
            timestamp: Utc::now(),
            level: metadata.level().as_str().to_string(),
            logger: metadata.target().to_string(),
            message: visitor.message.unwrap_or_default(),
            log_type: visitor
                .log_type
                .map(|t| t.to_lowercase())
                .unwrap_or_else(|| RUNTIME_LOG_TYPE.to_string()),
            run_id: visitor.run_id,
            event: visitor.event,
            payload: visitor.payload,
        };
        self.buffer.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let buffer = LogBuffer::new(2);
        for message in ["one", "two", "three"] {
            buffer.push(LogRecord::new("INFO", "test", message));
        }
        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "two");
        assert_eq!(records[0].sequence, 2);
        assert_eq!(records[1].sequence, 3);
    }

    #[test]
    fn test_records_after_cursor() {
        let buffer = LogBuffer::new(10);
        buffer.push(LogRecord::new("INFO", "test", "a"));
        buffer.push(LogRecord::new("INFO", "test", "b").with_log_type("prompts"));
        buffer.push(LogRecord::new("INFO", "test", "c"));

        let page = buffer.records_after(0, 10, Some("runtime"));
        let messages: Vec<&str> = page.records.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "c"]);
        assert_eq!(page.cursor, 3);

        let page = buffer.records_after(1, 1, None);
        assert_eq!(page.records[0].message, "b");
        assert_eq!(page.cursor, 2);

        let page = buffer.records_after(3, 10, None);
        assert!(page.records.is_empty());
        assert_eq!(page.cursor, 3);
    }

    #[test]
    fn test_recent_keeps_order() {
        let buffer = LogBuffer::new(10);
        for message in ["a", "b", "c"] {
            buffer.push(LogRecord::new("INFO", "test", message));
        }
        let recent = buffer.recent(2, None);
        assert_eq!(recent[0].message, "b");
        assert_eq!(recent[1].message, "c");
    }

    #[test]
    fn test_layer_captures_structured_fields() {
        let buffer = Arc::new(LogBuffer::new(16));
        let subscriber =
            tracing_subscriber::registry().with(LogCaptureLayer::new(buffer.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let run_id = "run-9";
            tracing::warn!(
                event = "agent.planner.fallback",
                run_id = %run_id,
                attempt = 2u64,
                "Planner fell back"
            );
            tracing::info!(log_type = "prompts", agent = "PlannerAgent", "Prompt sent");
        });

        let records = buffer.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].level, "WARN");
        assert_eq!(records[0].event.as_deref(), Some("agent.planner.fallback"));
        assert_eq!(records[0].run_id.as_deref(), Some("run-9"));
        assert_eq!(records[0].message, "Planner fell back");
        assert_eq!(records[0].payload["attempt"], 2);
        assert_eq!(records[0].log_type, "runtime");
        assert_eq!(records[1].log_type, "prompts");
        assert_eq!(records[1].payload["agent"], "PlannerAgent");
    }
}
