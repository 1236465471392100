//! Structured log records and the per-session publish/subscribe bus.
//!
//! Process-wide formatting goes through `tracing-subscriber`; sink format
//! is selected by the `SURVEYOR_LOG_FORMAT` environment variable (`json`
//! or `text`) and filtering by `RUST_LOG`. Each session additionally
//! publishes its records on a broadcast bus so API subscribers can stream
//! them without touching the process sink.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use surveyor_core::{now_millis, UnixMillis};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

/// Capacity of a session's log bus; slow subscribers lose oldest records.
const LOG_BUS_CAPACITY: usize = 1024;

/// One structured log record as published to session subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub level: String,
    pub message: String,
    /// Free-form structured attributes.
    pub attrs: serde_json::Map<String, Value>,
    /// The session this record belongs to.
    pub session: String,
    pub timestamp: UnixMillis,
}

impl LogRecord {
    /// Builds a record stamped "now" for the given session.
    #[must_use]
    pub fn new(level: &str, message: impl Into<String>, session: &str) -> Self {
        Self {
            level: level.to_string(),
            message: message.into(),
            attrs: serde_json::Map::new(),
            session: session.to_string(),
            timestamp: now_millis(),
        }
    }

    /// Attaches one structured attribute.
    #[must_use]
    pub fn with_attr(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.to_string(), value.into());
        self
    }
}

/// Per-session broadcast bus for [`LogRecord`]s.
pub struct LogBus {
    tx: broadcast::Sender<LogRecord>,
}

impl LogBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(LOG_BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes a record; also mirrors it onto the process tracing sink.
    pub fn publish(&self, record: LogRecord) {
        match record.level.as_str() {
            "error" => tracing::error!(session = %record.session, "{}", record.message),
            "warn" => tracing::warn!(session = %record.session, "{}", record.message),
            "debug" => tracing::debug!(session = %record.session, "{}", record.message),
            _ => tracing::info!(session = %record.session, "{}", record.message),
        }
        // No subscribers is fine; records are only buffered for listeners.
        let _ = self.tx.send(record);
    }

    /// Opens a new subscription starting at the current position.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LogBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Installs the process-wide tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops. Format selection:
/// `SURVEYOR_LOG_FORMAT=json` emits JSON lines, anything else emits the
/// human format. `RUST_LOG` filters as usual.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("SURVEYOR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    // A second init in tests or embedders is not an error worth surfacing.
    drop(result);
}
