//! Run tracing.
//!
//! An [`Agent`](crate::Agent) reports timing, inputs, outputs and retries
//! to an optional [`TraceSink`]. A sink that fails is logged and ignored;
//! it never changes the outcome of a run.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::providers::TokenUsage;

/// Errors a sink may report.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("trace sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to record trace event: {0}")]
    Record(String),
}

/// One event in the life of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    RunStarted {
        agent: String,
        model: String,
        inputs: Map<String, Value>,
    },

    /// The reply of one attempt failed validation.
    AttemptRejected {
        agent: String,
        attempt: u32,
        feedback: String,
    },

    RunCompleted {
        agent: String,
        model: String,
        attempts: u32,
        #[serde(with = "duration_text")]
        elapsed: Duration,
        output: Map<String, Value>,
        usage: TokenUsage,
    },

    RunFailed {
        agent: String,
        model: String,
        attempts: u32,
        #[serde(with = "duration_text")]
        elapsed: Duration,
        error: String,
    },
}

impl TraceEvent {
    pub fn agent(&self) -> &str {
        match self {
            TraceEvent::RunStarted { agent, .. }
            | TraceEvent::AttemptRejected { agent, .. }
            | TraceEvent::RunCompleted { agent, .. }
            | TraceEvent::RunFailed { agent, .. } => agent,
        }
    }

    /// Short event name, as used in the serialized `event` tag.
    pub fn name(&self) -> &'static str {
        match self {
            TraceEvent::RunStarted { .. } => "run_started",
            TraceEvent::AttemptRejected { .. } => "attempt_rejected",
            TraceEvent::RunCompleted { .. } => "run_completed",
            TraceEvent::RunFailed { .. } => "run_failed",
        }
    }
}

mod duration_text {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }
}

/// Receives trace events from agent runs.
pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent) -> Result<(), TraceError>;
}

/// Send an event to an optional sink, logging and swallowing failures.
pub(crate) fn emit(sink: Option<&Arc<dyn TraceSink>>, event: TraceEvent) {
    let Some(sink) = sink else {
        return;
    };
    if let Err(e) = sink.record(&event) {
        tracing::warn!(agent = %event.agent(), event = event.name(), error = %e, "trace sink failed");
    }
}

/// Writes events as `tracing` records under the `textagent::trace` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, event: &TraceEvent) -> Result<(), TraceError> {
        match event {
            TraceEvent::RunStarted { agent, model, inputs } => {
                tracing::info!(target: "textagent::trace", agent = %agent, model = %model, inputs = inputs.len(), "run started");
            }
            TraceEvent::AttemptRejected {
                agent,
                attempt,
                feedback,
            } => {
                tracing::info!(target: "textagent::trace", agent = %agent, attempt, feedback = %feedback, "attempt rejected");
            }
            TraceEvent::RunCompleted {
                agent,
                model,
                attempts,
                elapsed,
                usage,
                ..
            } => {
                tracing::info!(
                    target: "textagent::trace",
                    agent = %agent,
                    model = %model,
                    attempts,
                    elapsed = ?elapsed,
                    tokens = usage.total(),
                    "run completed"
                );
            }
            TraceEvent::RunFailed {
                agent,
                model,
                attempts,
                elapsed,
                error,
            } => {
                tracing::info!(
                    target: "textagent::trace",
                    agent = %agent,
                    model = %model,
                    attempts,
                    elapsed = ?elapsed,
                    error = %error,
                    "run failed"
                );
            }
        }
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl TraceSink for MemorySink {
    fn record(&self, event: &TraceEvent) -> Result<(), TraceError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenSink;

    impl TraceSink for BrokenSink {
        fn record(&self, _event: &TraceEvent) -> Result<(), TraceError> {
            Err(TraceError::Unavailable("collector down".to_string()))
        }
    }

    fn started() -> TraceEvent {
        TraceEvent::RunStarted {
            agent: "reviewer".to_string(),
            model: "test:model".to_string(),
            inputs: Map::new(),
        }
    }

    #[test]
    fn test_memory_sink_records_in_order() {
        let memory = Arc::new(MemorySink::new());
        let sink: Arc<dyn TraceSink> = memory.clone();
        emit(Some(&sink), started());
        emit(
            Some(&sink),
            TraceEvent::AttemptRejected {
                agent: "reviewer".to_string(),
                attempt: 1,
                feedback: "bad".to_string(),
            },
        );

        let names: Vec<_> = memory.events().iter().map(TraceEvent::name).collect();
        assert_eq!(names, vec!["run_started", "attempt_rejected"]);
        memory.clear();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_broken_sink_is_swallowed() {
        let sink: Arc<dyn TraceSink> = Arc::new(BrokenSink);
        emit(Some(&sink), started());
        emit(None, started());
    }

    #[test]
    fn test_event_serialization() {
        let event = TraceEvent::RunFailed {
            agent: "a".to_string(),
            model: "m".to_string(),
            attempts: 3,
            elapsed: Duration::from_millis(1500),
            error: "boom".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "run_failed");
        assert_eq!(value["attempts"], 3);
        assert_eq!(value["elapsed"], json!("1s 500ms"));
        assert_eq!(event.agent(), "a");
    }

    #[test]
    fn test_log_sink_never_fails() {
        assert!(LogSink.record(&started()).is_ok());
    }
}
