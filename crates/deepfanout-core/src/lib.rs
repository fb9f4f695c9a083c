//! DeepFanout core abstractions.
//!
//! This crate provides the data model, search providers, the concurrent
//! fan-out engine, the LLM client, and the planner/orchestrator used to run a
//! research workflow of Supervisor, Researcher, Executor, Analyst and Critic
//! agents.

pub mod config;
mod error;
mod events;
pub mod export;
mod fanout;
pub mod llm;
mod logging;
pub mod metrics;
mod orchestrator;
mod planner;
mod query;
pub mod report;
mod retry;
pub mod search;
mod security;
pub mod source;
mod telemetry;
mod trace;

pub use config::{Config, ConfigLoader};
pub use error::{FanoutError, TaskError};
pub use events::{Event, EventCollector, EventId, EventLog, TaskOutcome, persist_events};
pub use export::BrowserPdfExporter;
pub use fanout::{FanoutEngine, FanoutFailure, FanoutReport, FanoutSettings, run_fanout};
pub use llm::{DynLlmClient, LlmClient, LlmError, LlmRequest};
pub use logging::{LogSettings, RunLogInput, log_run_completion, sanitize_text};
pub use orchestrator::{
    ExecutionReport, Orchestrator, OrchestratorConfig, TaskInput, TaskResult, TaskRunner,
};
pub use planner::{
    ASSEMBLY_TASK, AgentRole, CRITIQUE_TASK, PlanMode, ResearchPlanner, SYNTHESIS_TASK, Section,
    TaskGraph, TaskId, TaskNode,
};
pub use query::{Query, slugify};
pub use report::{Report, extract_citations, write_report};
pub use retry::RetryPolicy;
pub use search::{DynSearchProvider, SearchError, SearchProvider};
pub use security::{SecretValue, optional_env, require_env};
pub use source::{SearchHit, SourceRecord};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceStep, TraceSummary, persist_trace_summary};
