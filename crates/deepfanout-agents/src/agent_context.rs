//! Agent execution context and message contracts.
//!
//! Defines the runtime context each agent role receives from the dispatcher:
//! the node parameters, the outputs of upstream tasks, and a handle for
//! emitting reasoning messages into the run trace.

use deepfanout_core::{AgentRole, EventCollector, TaskError, TaskId, TaskInput, TaskNode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context for agent execution
#[derive(Clone)]
pub struct AgentContext {
    pub task_id: TaskId,
    pub role: AgentRole,
    pub parameters: HashMap<String, serde_json::Value>,
    /// Outputs of the node's successful dependencies.
    pub inputs: Vec<TaskInput>,
    pub event_collector: EventCollector,
}

impl AgentContext {
    pub fn new(
        task_id: TaskId,
        role: AgentRole,
        parameters: HashMap<String, serde_json::Value>,
        inputs: Vec<TaskInput>,
        event_collector: EventCollector,
    ) -> Self {
        Self {
            task_id,
            role,
            parameters,
            inputs,
            event_collector,
        }
    }

    pub fn from_node(
        node: &TaskNode,
        inputs: &[TaskInput],
        event_collector: EventCollector,
    ) -> Self {
        Self::new(
            node.id.clone(),
            node.role,
            node.parameters.clone(),
            inputs.to_vec(),
            event_collector,
        )
    }

    /// Send a message to another agent or log internal reasoning
    pub fn send_message(
        &self,
        to_task: Option<TaskId>,
        content: String,
        metadata: serde_json::Value,
    ) {
        self.event_collector.emit_message(
            self.task_id.clone(),
            to_task,
            self.role,
            content,
            metadata,
        );
    }

    /// Get a parameter value
    pub fn get_param(&self, key: &str) -> Option<&serde_json::Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.get_param(key).and_then(|value| value.as_str())
    }

    /// A string parameter the task cannot run without.
    pub fn require_str(&self, key: &str) -> Result<&str, TaskError> {
        self.param_str(key).ok_or_else(|| {
            TaskError::terminal(format!("task {} is missing parameter '{key}'", self.task_id))
        })
    }
}

/// Result of agent execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub task_id: TaskId,
    pub role: AgentRole,
    pub output: serde_json::Value,
    /// Share of the agent's work that succeeded without falling back.
    pub confidence: f64,
}

/// Trait for agent implementations
#[async_trait::async_trait]
pub trait Agent: Send + Sync {
    /// Execute the agent's task
    async fn execute(&self, context: &AgentContext) -> Result<AgentResult, TaskError>;

    /// Get the agent's role
    fn role(&self) -> AgentRole;
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepfanout_core::Event;

    #[tokio::test]
    async fn messages_carry_task_and_role() {
        let (collector, mut receiver) = EventCollector::new();
        let node = TaskNode::new("research_1", "Research", AgentRole::Researcher)
            .with_param("query", serde_json::json!("lithium supply"));
        let context = AgentContext::from_node(&node, &[], collector);

        assert_eq!(context.param_str("query"), Some("lithium supply"));
        assert!(context.require_str("topic").is_err());

        context.send_message(None, "searching".into(), serde_json::json!({}));
        match receiver.recv().await.unwrap() {
            Event::Message {
                from_task, role, ..
            } => {
                assert_eq!(from_task, "research_1");
                assert_eq!(role, AgentRole::Researcher);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
