//! Task planning and DAG construction for the multi-agent research workflow.
//!
//! The planner turns a [`Query`] (quick mode) or an outline of [`Section`]s
//! (deep mode) into a directed acyclic graph of role-tagged tasks.

use crate::Query;
use crate::error::FanoutError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Unique identifier for a task node
pub type TaskId = String;

/// Agent role assignment for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    /// Decomposes the topic into sub-queries or an outline
    Supervisor,
    /// Fans a sub-query out across the search providers
    Researcher,
    /// Summarises scraped content per source
    Executor,
    /// Synthesizes summaries into report text
    Analyst,
    /// Validates citations and checks consistency
    Critic,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Supervisor => "Supervisor",
            AgentRole::Researcher => "Researcher",
            AgentRole::Executor => "Executor",
            AgentRole::Analyst => "Analyst",
            AgentRole::Critic => "Critic",
        }
    }
}

/// One chapter of a deep-mode outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub objective: String,
}

/// How much structure the final report gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Sub-queries feed one synthesis pass.
    Quick,
    /// An outline of sections, each researched and written separately.
    Deep,
}

/// A single task node in the execution graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    /// Unique task identifier
    pub id: TaskId,
    /// Human-readable description
    pub description: String,
    /// Agent role assigned to execute this task
    pub role: AgentRole,
    /// Task-specific parameters (search queries, section objectives, etc.)
    pub parameters: HashMap<String, serde_json::Value>,
    /// IDs of tasks that must complete before this one
    pub dependencies: Vec<TaskId>,
}

impl TaskNode {
    pub fn new(id: impl Into<TaskId>, description: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role,
            parameters: HashMap::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, dep_id: impl Into<TaskId>) -> Self {
        self.dependencies.push(dep_id.into());
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(|v| v.as_str())
    }
}

/// Directed acyclic graph of tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    /// All task nodes indexed by ID
    nodes: HashMap<TaskId, TaskNode>,
    /// Insertion order, used to keep scheduling deterministic
    order: Vec<TaskId>,
    /// Adjacency list: task_id -> [dependent_task_ids]
    edges: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            edges: HashMap::new(),
        }
    }

    /// Add a task node to the graph
    pub fn add_node(&mut self, node: TaskNode) -> Result<(), FanoutError> {
        if self.nodes.contains_key(&node.id) {
            return Err(FanoutError::PlanningError(format!(
                "Task node with ID '{}' already exists",
                node.id
            )));
        }

        for dep_id in &node.dependencies {
            if !self.nodes.contains_key(dep_id) {
                return Err(FanoutError::PlanningError(format!(
                    "Dependency '{}' not found for task '{}'",
                    dep_id, node.id
                )));
            }
        }

        for dep_id in &node.dependencies {
            self.edges
                .entry(dep_id.clone())
                .or_default()
                .push(node.id.clone());
        }

        self.order.push(node.id.clone());
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// Validate that the graph is acyclic
    pub fn validate(&self) -> Result<(), FanoutError> {
        let order = self.kahn_order();
        if order.len() != self.nodes.len() {
            return Err(FanoutError::PlanningError(
                "Graph contains cycles".to_string(),
            ));
        }
        Ok(())
    }

    /// Get topological ordering of tasks; ties follow insertion order.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, FanoutError> {
        self.validate()?;
        Ok(self.kahn_order())
    }

    fn kahn_order(&self) -> Vec<TaskId> {
        let mut in_degree: HashMap<&TaskId, usize> = self
            .nodes
            .values()
            .map(|node| (&node.id, node.dependencies.len()))
            .collect();

        let mut queue: VecDeque<&TaskId> = self
            .order
            .iter()
            .filter(|id| in_degree.get(id).copied() == Some(0))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node_id) = queue.pop_front() {
            order.push(node_id.clone());

            if let Some(dependents) = self.edges.get(node_id) {
                for dep_id in dependents {
                    if let Some(degree) = in_degree.get_mut(dep_id) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dep_id);
                        }
                    }
                }
            }
        }

        order
    }

    /// Get a task node by ID
    pub fn get_node(&self, id: &str) -> Option<&TaskNode> {
        self.nodes.get(id)
    }

    /// Get all task nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    /// Nodes not yet completed whose dependencies all are.
    pub fn ready_after(&self, completed: &HashSet<TaskId>) -> Vec<&TaskNode> {
        self.nodes()
            .filter(|node| !completed.contains(&node.id))
            .filter(|node| node.dependencies.iter().all(|dep| completed.contains(dep)))
            .collect()
    }

    /// Get number of nodes in graph
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if graph is empty
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Task id of the node whose output becomes the report body.
pub const SYNTHESIS_TASK: &str = "synthesize";
/// Task id of the deep-mode chapter assembly node.
pub const ASSEMBLY_TASK: &str = "assemble";
/// Task id of the critic node.
pub const CRITIQUE_TASK: &str = "critique";

/// Builds task graphs for research runs.
pub struct ResearchPlanner {
    min_confidence: f64,
}

impl ResearchPlanner {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    /// Quick mode: research → summarize per sub-query, then synthesize → critique.
    pub fn plan_queries(&self, query: &Query) -> Result<TaskGraph, FanoutError> {
        tracing::info!(
            topic = %query.topic,
            sub_queries = query.len(),
            "Planning quick research graph"
        );

        let mut graph = TaskGraph::new();
        let mut summarizers = Vec::with_capacity(query.len());

        for (idx, sub_query) in query.sub_queries.iter().enumerate() {
            let summarize_id = self.add_branch(&mut graph, idx + 1, &query.topic, sub_query)?;
            summarizers.push(summarize_id);
        }

        let mut synthesis = TaskNode::new(
            SYNTHESIS_TASK,
            format!("Synthesize report for: {}", query.topic),
            AgentRole::Analyst,
        )
        .with_param("topic", serde_json::json!(query.topic))
        .with_param("mode", serde_json::json!("report"));
        for dep in summarizers {
            synthesis = synthesis.with_dependency(dep);
        }
        graph.add_node(synthesis)?;

        self.add_critique(&mut graph, &query.topic, SYNTHESIS_TASK)?;
        graph.validate()?;

        tracing::debug!(task_count = graph.len(), "Task graph constructed");
        Ok(graph)
    }

    /// Deep mode: one research → summarize → chapter chain per section, then
    /// assemble → critique.
    pub fn plan_sections(
        &self,
        topic: &str,
        sections: &[Section],
    ) -> Result<TaskGraph, FanoutError> {
        if sections.is_empty() {
            return Err(FanoutError::PlanningError(
                "deep research requires at least one section".to_string(),
            ));
        }
        tracing::info!(topic = %topic, sections = sections.len(), "Planning deep research graph");

        let mut graph = TaskGraph::new();
        let mut chapters = Vec::with_capacity(sections.len());

        for (idx, section) in sections.iter().enumerate() {
            let position = idx + 1;
            let summarize_id = self.add_branch(&mut graph, position, topic, &section.objective)?;

            let chapter_id = format!("chapter_{position}");
            graph.add_node(
                TaskNode::new(
                    chapter_id.clone(),
                    format!("Write chapter: {}", section.title),
                    AgentRole::Analyst,
                )
                .with_param("topic", serde_json::json!(topic))
                .with_param("mode", serde_json::json!("chapter"))
                .with_param("title", serde_json::json!(section.title))
                .with_param("objective", serde_json::json!(section.objective))
                .with_dependency(summarize_id),
            )?;
            chapters.push(chapter_id);
        }

        let mut assemble = TaskNode::new(
            ASSEMBLY_TASK,
            format!("Assemble master report: {topic}"),
            AgentRole::Analyst,
        )
        .with_param("topic", serde_json::json!(topic))
        .with_param("mode", serde_json::json!("assemble"));
        for dep in chapters {
            assemble = assemble.with_dependency(dep);
        }
        graph.add_node(assemble)?;

        self.add_critique(&mut graph, topic, ASSEMBLY_TASK)?;
        graph.validate()?;

        tracing::debug!(task_count = graph.len(), "Task graph constructed");
        Ok(graph)
    }

    fn add_branch(
        &self,
        graph: &mut TaskGraph,
        position: usize,
        topic: &str,
        search_query: &str,
    ) -> Result<TaskId, FanoutError> {
        let research_id = format!("research_{position}");
        let summarize_id = format!("summarize_{position}");

        graph.add_node(
            TaskNode::new(
                research_id.clone(),
                format!("Research: {search_query}"),
                AgentRole::Researcher,
            )
            .with_param("topic", serde_json::json!(topic))
            .with_param("query", serde_json::json!(search_query)),
        )?;

        graph.add_node(
            TaskNode::new(
                summarize_id.clone(),
                format!("Summarize sources for: {search_query}"),
                AgentRole::Executor,
            )
            .with_param("query", serde_json::json!(search_query))
            .with_dependency(research_id),
        )?;

        Ok(summarize_id)
    }

    fn add_critique(
        &self,
        graph: &mut TaskGraph,
        topic: &str,
        body_task: &str,
    ) -> Result<(), FanoutError> {
        graph.add_node(
            TaskNode::new(
                CRITIQUE_TASK,
                format!("Fact-check and validate: {topic}"),
                AgentRole::Critic,
            )
            .with_param("topic", serde_json::json!(topic))
            .with_param("min_confidence", serde_json::json!(self.min_confidence))
            .with_dependency(body_task),
        )
    }
}
