//! Orchestrator for DAG execution with retry logic and concurrency control.
//!
//! Tasks start as soon as all of their dependencies have settled, bounded by a
//! semaphore. Retryable failures back off exponentially; terminal failures are
//! recorded without aborting the graph, and a task whose dependencies all
//! failed is skipped.

use crate::error::{FanoutError, TaskError};
use crate::events::{EventCollector, TaskOutcome};
use crate::planner::{AgentRole, TaskGraph, TaskId, TaskNode};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};

/// Configuration for orchestrator behavior
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum concurrent tasks
    pub max_concurrent_tasks: usize,
    /// Backoff policy for retryable task failures
    pub retry: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 5,
            retry: RetryPolicy::default(),
        }
    }
}

/// Output of a successful upstream task, handed to its dependents.
#[derive(Debug, Clone)]
pub struct TaskInput {
    pub task_id: TaskId,
    pub role: AgentRole,
    pub output: serde_json::Value,
}

/// Executes the work behind a task node.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// `inputs` holds the outputs of the node's successful dependencies, in
    /// dependency order.
    async fn run_task(
        &self,
        node: &TaskNode,
        inputs: &[TaskInput],
    ) -> Result<serde_json::Value, TaskError>;
}

/// Result of task execution
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub role: AgentRole,
    pub outcome: TaskOutcome,
    pub output: Option<serde_json::Value>,
    pub duration_ms: u64,
    pub attempts: usize,
}

/// Orchestrator that executes task graphs
pub struct Orchestrator {
    config: OrchestratorConfig,
    event_collector: EventCollector,
    semaphore: Arc<Semaphore>,
    results: Arc<RwLock<HashMap<TaskId, TaskResult>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, event_collector: EventCollector) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1)));

        Self {
            config,
            event_collector,
            semaphore,
            results: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Execute a task graph
    pub async fn execute(
        &self,
        graph: &TaskGraph,
        runner: &dyn TaskRunner,
    ) -> Result<ExecutionReport, FanoutError> {
        tracing::info!(task_count = graph.len(), "Starting graph execution");

        let start_time = Instant::now();
        // Rejects cycles before anything runs.
        graph.topological_order()?;

        let mut settled: HashMap<TaskId, TaskResult> = HashMap::new();
        let mut done: HashSet<TaskId> = HashSet::new();
        let mut dispatched: HashSet<TaskId> = HashSet::new();
        let mut running = FuturesUnordered::new();

        loop {
            // A skipped task settles immediately and can free its dependents,
            // so sweep until a pass finds nothing new.
            loop {
                let ready: Vec<&TaskNode> = graph
                    .ready_after(&done)
                    .into_iter()
                    .filter(|node| !dispatched.contains(&node.id))
                    .collect();
                if ready.is_empty() {
                    break;
                }

                for node in ready {
                    dispatched.insert(node.id.clone());

                    let inputs: Vec<TaskInput> = node
                        .dependencies
                        .iter()
                        .filter_map(|dep| settled.get(dep))
                        .filter(|result| result.outcome.is_success())
                        .map(|result| TaskInput {
                            task_id: result.task_id.clone(),
                            role: result.role,
                            output: result.output.clone().unwrap_or_default(),
                        })
                        .collect();

                    if !node.dependencies.is_empty() && inputs.is_empty() {
                        tracing::warn!(
                            task_id = %node.id,
                            "All dependencies failed, skipping task"
                        );
                        self.event_collector.emit_finish(
                            node.id.clone(),
                            node.role,
                            TaskOutcome::Skipped,
                            0,
                        );
                        done.insert(node.id.clone());
                        settled.insert(
                            node.id.clone(),
                            TaskResult {
                                task_id: node.id.clone(),
                                role: node.role,
                                outcome: TaskOutcome::Skipped,
                                output: None,
                                duration_ms: 0,
                                attempts: 0,
                            },
                        );
                        continue;
                    }

                    running.push(self.execute_task(node, inputs, runner));
                }
            }

            match running.next().await {
                Some(result) => {
                    done.insert(result.task_id.clone());
                    settled.insert(result.task_id.clone(), result);
                }
                None => break,
            }
        }

        if dispatched.len() < graph.len() {
            return Err(FanoutError::OrchestrationError(format!(
                "{} task(s) never became ready",
                graph.len() - dispatched.len()
            )));
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let report = ExecutionReport::from_results(graph.len(), settled.values(), duration_ms);

        tracing::info!(
            duration_ms = duration_ms,
            success_count = report.successful_tasks,
            failed_count = report.failed_tasks,
            skipped_count = report.skipped_tasks,
            total_count = report.total_tasks,
            "Graph execution complete"
        );

        self.results.write().await.extend(settled);
        Ok(report)
    }

    /// Execute a single task with retry logic
    async fn execute_task(
        &self,
        node: &TaskNode,
        inputs: Vec<TaskInput>,
        runner: &dyn TaskRunner,
    ) -> TaskResult {
        let mut attempt = 0;

        loop {
            attempt += 1;
            // Acquire semaphore permit for concurrency control
            let permit = self.semaphore.acquire().await.ok();

            tracing::debug!(
                task_id = %node.id,
                role = %node.role.as_str(),
                attempt = attempt,
                inputs = inputs.len(),
                "Executing task"
            );

            let start_time = Instant::now();
            self.event_collector
                .emit_start(node.id.clone(), node.role, node.description.clone());

            let result = runner.run_task(node, &inputs).await;
            let duration_ms = start_time.elapsed().as_millis() as u64;
            drop(permit);

            match result {
                Ok(output) => {
                    self.event_collector.emit_finish(
                        node.id.clone(),
                        node.role,
                        TaskOutcome::Success,
                        duration_ms,
                    );
                    return TaskResult {
                        task_id: node.id.clone(),
                        role: node.role,
                        outcome: TaskOutcome::Success,
                        output: Some(output),
                        duration_ms,
                        attempts: attempt,
                    };
                }
                Err(e) if attempt <= self.config.retry.max_retries && e.is_retryable() => {
                    let backoff = self.config.retry.backoff(attempt);
                    tracing::warn!(
                        task_id = %node.id,
                        error = %e,
                        attempt = attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Task failed, retrying"
                    );

                    self.event_collector.emit_finish(
                        node.id.clone(),
                        node.role,
                        TaskOutcome::Failure {
                            reason: e.reason.clone(),
                            retryable: true,
                        },
                        duration_ms,
                    );

                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    tracing::error!(
                        task_id = %node.id,
                        error = %e,
                        "Task failed permanently"
                    );

                    let outcome = TaskOutcome::Failure {
                        reason: e.reason,
                        retryable: false,
                    };
                    self.event_collector.emit_finish(
                        node.id.clone(),
                        node.role,
                        outcome.clone(),
                        duration_ms,
                    );
                    return TaskResult {
                        task_id: node.id.clone(),
                        role: node.role,
                        outcome,
                        output: None,
                        duration_ms,
                        attempts: attempt,
                    };
                }
            }
        }
    }

    /// Get results for all executed tasks
    pub async fn get_results(&self) -> HashMap<TaskId, TaskResult> {
        self.results.read().await.clone()
    }

    pub fn event_collector(&self) -> &EventCollector {
        &self.event_collector
    }
}

/// Summary report of graph execution
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionReport {
    pub total_tasks: usize,
    pub successful_tasks: usize,
    pub failed_tasks: usize,
    pub skipped_tasks: usize,
    pub duration_ms: u64,
}

impl ExecutionReport {
    fn from_results<'a>(
        total_tasks: usize,
        results: impl Iterator<Item = &'a TaskResult>,
        duration_ms: u64,
    ) -> Self {
        let mut report = Self {
            total_tasks,
            successful_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
            duration_ms,
        };
        for result in results {
            match result.outcome {
                TaskOutcome::Success => report.successful_tasks += 1,
                TaskOutcome::Failure { .. } => report.failed_tasks += 1,
                TaskOutcome::Skipped => report.skipped_tasks += 1,
            }
        }
        report
    }
}
