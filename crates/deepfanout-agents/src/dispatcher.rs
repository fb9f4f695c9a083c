//! Routes task graph nodes to the agent registered for their role.

use std::collections::HashMap;
use std::sync::Arc;

use crate::agent_context::{Agent, AgentContext};
use async_trait::async_trait;
use deepfanout_core::{AgentRole, EventCollector, TaskError, TaskInput, TaskNode, TaskRunner};
use tracing::debug;

pub struct AgentDispatcher {
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
    event_collector: EventCollector,
}

impl AgentDispatcher {
    pub fn new(event_collector: EventCollector) -> Self {
        Self {
            agents: HashMap::new(),
            event_collector,
        }
    }

    /// Register `agent` for its role, replacing any previous one.
    pub fn register(mut self, agent: impl Agent + 'static) -> Self {
        self.agents.insert(agent.role(), Arc::new(agent));
        self
    }

    pub fn handles(&self, role: AgentRole) -> bool {
        self.agents.contains_key(&role)
    }
}

#[async_trait]
impl TaskRunner for AgentDispatcher {
    async fn run_task(
        &self,
        node: &TaskNode,
        inputs: &[TaskInput],
    ) -> Result<serde_json::Value, TaskError> {
        let agent = self.agents.get(&node.role).ok_or_else(|| {
            TaskError::terminal(format!("no agent registered for role {}", node.role.as_str()))
        })?;

        let context = AgentContext::from_node(node, inputs, self.event_collector.clone());
        let result = agent.execute(&context).await?;
        debug!(
            task_id = %result.task_id,
            confidence = result.confidence,
            "Agent finished"
        );
        Ok(result.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_context::AgentResult;

    struct Fixed;

    #[async_trait]
    impl Agent for Fixed {
        async fn execute(&self, context: &AgentContext) -> Result<AgentResult, TaskError> {
            Ok(AgentResult {
                task_id: context.task_id.clone(),
                role: AgentRole::Critic,
                output: serde_json::json!({"inputs": context.inputs.len()}),
                confidence: 1.0,
            })
        }

        fn role(&self) -> AgentRole {
            AgentRole::Critic
        }
    }

    #[tokio::test]
    async fn routes_by_role() {
        let dispatcher = AgentDispatcher::new(EventCollector::default()).register(Fixed);
        assert!(dispatcher.handles(AgentRole::Critic));

        let node = TaskNode::new("critique", "Critique", AgentRole::Critic);
        let inputs = vec![TaskInput {
            task_id: "synthesize".into(),
            role: AgentRole::Analyst,
            output: serde_json::json!({}),
        }];
        let output = dispatcher.run_task(&node, &inputs).await.unwrap();
        assert_eq!(output["inputs"], 1);
    }

    #[tokio::test]
    async fn unregistered_role_is_terminal() {
        let dispatcher = AgentDispatcher::new(EventCollector::default());
        let node = TaskNode::new("research_1", "Research", AgentRole::Researcher);

        let err = dispatcher.run_task(&node, &[]).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
