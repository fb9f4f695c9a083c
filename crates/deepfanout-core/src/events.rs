//! Event bus for explainability and trace collection.
//!
//! All orchestrator and agent events flow through this system so a run can be
//! replayed as a reasoning trace.

use crate::planner::{AgentRole, TaskId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Unique identifier for an event
pub type EventId = String;

/// Orchestrator and agent lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task execution started
    Start {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        role: AgentRole,
        description: String,
    },
    /// Task execution finished
    Finish {
        event_id: EventId,
        timestamp: u64,
        task_id: TaskId,
        role: AgentRole,
        outcome: TaskOutcome,
        duration_ms: u64,
    },
    /// Message between agents or internal reasoning step
    Message {
        event_id: EventId,
        timestamp: u64,
        from_task: TaskId,
        to_task: Option<TaskId>,
        role: AgentRole,
        content: String,
        metadata: serde_json::Value,
    },
}

impl Event {
    pub fn event_id(&self) -> &str {
        match self {
            Event::Start { event_id, .. } => event_id,
            Event::Finish { event_id, .. } => event_id,
            Event::Message { event_id, .. } => event_id,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match self {
            Event::Start { timestamp, .. } => *timestamp,
            Event::Finish { timestamp, .. } => *timestamp,
            Event::Message { timestamp, .. } => *timestamp,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        match self {
            Event::Start { task_id, .. } => task_id,
            Event::Finish { task_id, .. } => task_id,
            Event::Message { from_task, .. } => from_task,
        }
    }
}

/// Outcome of a task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failure { reason: String, retryable: bool },
    /// Not run because every dependency failed
    Skipped,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success)
    }
}

/// Event collector handle shared by the orchestrator and agents
#[derive(Clone)]
pub struct EventCollector {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventCollector {
    /// Create a new event collector
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Emit a Start event
    pub fn emit_start(&self, task_id: TaskId, role: AgentRole, description: String) {
        self.send(Event::Start {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id,
            role,
            description,
        });
    }

    /// Emit a Finish event
    pub fn emit_finish(
        &self,
        task_id: TaskId,
        role: AgentRole,
        outcome: TaskOutcome,
        duration_ms: u64,
    ) {
        self.send(Event::Finish {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            task_id,
            role,
            outcome,
            duration_ms,
        });
    }

    /// Emit a Message event
    pub fn emit_message(
        &self,
        from_task: TaskId,
        to_task: Option<TaskId>,
        role: AgentRole,
        content: String,
        metadata: serde_json::Value,
    ) {
        self.send(Event::Message {
            event_id: generate_event_id(),
            timestamp: current_timestamp(),
            from_task,
            to_task,
            role,
            content,
            metadata,
        });
    }

    fn send(&self, event: Event) {
        // A dropped receiver only means nobody is tracing this run.
        if self.sender.send(event).is_err() {
            tracing::trace!("event receiver closed; event dropped");
        }
    }
}

impl Default for EventCollector {
    fn default() -> Self {
        Self::new().0
    }
}

/// Generate a unique event ID
fn generate_event_id() -> EventId {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("evt_{}", id)
}

/// Get current Unix timestamp in milliseconds
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Buffers events from the channel for later export
pub struct EventLog {
    receiver: mpsc::UnboundedReceiver<Event>,
    events: Vec<Event>,
}

impl EventLog {
    pub fn new(receiver: mpsc::UnboundedReceiver<Event>) -> Self {
        Self {
            receiver,
            events: Vec::new(),
        }
    }

    /// Collect events until every sender has been dropped.
    pub async fn collect(&mut self) {
        while let Some(event) = self.receiver.recv().await {
            tracing::trace!(event_id = %event.event_id(), "Collected event");
            self.events.push(event);
        }
    }

    /// Take whatever is already queued without waiting.
    pub fn drain_pending(&mut self) {
        while let Ok(event) = self.receiver.try_recv() {
            self.events.push(event);
        }
    }

    /// Get all collected events
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Event> {
        self.events
    }

    /// Export events as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.events)
    }
}

/// Write events to `<dir>/<run_id>.json`.
pub fn persist_events<P: AsRef<Path>>(
    dir: P,
    run_id: &str,
    events: &[Event],
) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    std::fs::write(&path, payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_collector() {
        let (collector, mut receiver) = EventCollector::new();

        collector.emit_start(
            "research_1".to_string(),
            AgentRole::Researcher,
            "Test task".to_string(),
        );

        let event = receiver.recv().await.unwrap();
        match event {
            Event::Start { task_id, .. } => assert_eq!(task_id, "research_1"),
            _ => panic!("Expected Start event"),
        }
    }

    #[tokio::test]
    async fn test_event_log_collects_until_closed() {
        let (collector, receiver) = EventCollector::new();
        let mut log = EventLog::new(receiver);

        collector.emit_start("t1".to_string(), AgentRole::Supervisor, "plan".to_string());
        collector.emit_finish("t1".to_string(), AgentRole::Supervisor, TaskOutcome::Success, 3);
        drop(collector);

        log.collect().await;
        assert_eq!(log.events().len(), 2);
        assert!(log.to_json().unwrap().contains("\"type\": \"finish\""));
    }

    #[test]
    fn persist_events_writes_json_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (collector, receiver) = EventCollector::new();
        let mut log = EventLog::new(receiver);
        collector.emit_message(
            "critique".to_string(),
            None,
            AgentRole::Critic,
            "verdict".to_string(),
            serde_json::json!({"confidence": 0.9}),
        );
        log.drain_pending();

        let path = persist_events(dir.path(), "run-1", log.events()).unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("verdict"));
    }
}
