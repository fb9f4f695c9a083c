//! End-to-end research runs: plan, fan out, summarize, synthesize, critique,
//! write the report.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::analyst::AnalystAgent;
use crate::critic::CriticAgent;
use crate::dispatcher::AgentDispatcher;
use crate::executor::ExecutorAgent;
use crate::payloads::{CritiqueVerdict, DraftOutput};
use crate::researcher::ResearcherAgent;
use crate::supervisor::SupervisorAgent;
use deepfanout_core::llm::OpenAiResponsesClient;
use deepfanout_core::search::providers_from_config;
use deepfanout_core::{
    ASSEMBLY_TASK, AgentRole, BrowserPdfExporter, CRITIQUE_TASK, Config, DynLlmClient,
    DynSearchProvider, EventCollector, EventLog, ExecutionReport, FanoutEngine, FanoutError,
    FanoutSettings, LogSettings, Orchestrator, OrchestratorConfig, Query, Report,
    ResearchPlanner, RetryPolicy, RunLogInput, SYNTHESIS_TASK, Section, TaskGraph, TaskId,
    TaskOutcome, TaskResult, TraceSummary, log_run_completion, persist_events,
    persist_trace_summary, write_report,
};
use tracing::{info, warn};
use uuid::Uuid;

const SUPERVISOR_TASK: &str = "plan";

/// Clients a run talks to.
#[derive(Clone)]
pub struct ResearchServices {
    pub llm: DynLlmClient,
    pub providers: Vec<DynSearchProvider>,
}

impl ResearchServices {
    /// OpenAI Responses client plus every search provider with a key.
    pub fn from_config(config: &Config) -> Result<Self, FanoutError> {
        let llm = OpenAiResponsesClient::new(config.llm_api_key()?, &config.llm)?;
        Ok(Self {
            llm: Arc::new(llm),
            providers: providers_from_config(config)?,
        })
    }
}

/// Options for a research run.
#[derive(Debug, Clone)]
pub struct ResearchOptions {
    pub topic: String,
    /// Explicit sub-queries; skips Supervisor planning.
    pub queries: Vec<String>,
    /// Explicit outline for deep mode; skips Supervisor planning.
    pub sections: Vec<Section>,
    /// Deep mode; `None` defers to `planner.deep_mode`.
    pub deep: Option<bool>,
    /// Overrides `output.dir`.
    pub output_dir: Option<PathBuf>,
    pub export_pdf: bool,
    pub persist_trace: bool,
    /// Where to append the run log; `None` disables it.
    pub run_log: Option<LogSettings>,
}

impl ResearchOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            queries: Vec::new(),
            sections: Vec::new(),
            deep: None,
            output_dir: None,
            export_pdf: false,
            persist_trace: false,
            run_log: Some(LogSettings::from_env()),
        }
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries = queries;
        self
    }

    pub fn with_sections(mut self, sections: Vec<Section>) -> Self {
        self.sections = sections;
        self
    }

    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = Some(deep);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_pdf(mut self, export: bool) -> Self {
        self.export_pdf = export;
        self
    }

    pub fn with_trace(mut self, persist: bool) -> Self {
        self.persist_trace = persist;
        self
    }

    pub fn with_run_log(mut self, settings: Option<LogSettings>) -> Self {
        self.run_log = settings;
        self
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct ResearchOutcome {
    pub run_id: String,
    pub report: Report,
    /// `None` when the critique task itself failed.
    pub verdict: Option<CritiqueVerdict>,
    pub report_path: PathBuf,
    pub pdf_path: Option<PathBuf>,
    pub execution: ExecutionReport,
    pub trace: TraceSummary,
    /// Raw events as JSON.
    pub trace_path: Option<PathBuf>,
    /// Markdown step list and Mermaid flowchart of the same events.
    pub trace_summary_path: Option<PathBuf>,
    pub sub_queries: Vec<String>,
    pub sections: Vec<Section>,
}

impl ResearchOutcome {
    pub fn requires_review(&self) -> bool {
        self.report.requires_review
    }
}

/// Run with clients built from `config`.
pub async fn run_research(
    config: &Config,
    options: ResearchOptions,
) -> Result<ResearchOutcome, FanoutError> {
    let services = ResearchServices::from_config(config)?;
    run_research_with(config, services, options).await
}

/// Run with caller-supplied clients.
pub async fn run_research_with(
    config: &Config,
    services: ResearchServices,
    options: ResearchOptions,
) -> Result<ResearchOutcome, FanoutError> {
    if options.topic.trim().is_empty() {
        return Err(FanoutError::InvalidInput("research topic must not be empty".into()));
    }
    let run_id = Uuid::new_v4().to_string();
    let deep = options.deep.unwrap_or(config.planner.deep_mode);
    info!(run_id = %run_id, topic = %options.topic, deep, "Starting research run");

    let (collector, receiver) = EventCollector::new();
    let mut events = EventLog::new(receiver);

    let planned = plan(config, &services, &options, deep, &collector).await?;
    let execution = execute(config, &services, &planned.graph, &collector).await?;
    let results = execution.results;

    let draft_task = if deep { ASSEMBLY_TASK } else { SYNTHESIS_TASK };
    let draft: DraftOutput = match results.get(draft_task) {
        Some(result) => match (&result.outcome, &result.output) {
            (TaskOutcome::Success, Some(output)) => {
                serde_json::from_value(output.clone()).map_err(|err| {
                    FanoutError::OrchestrationError(format!("bad draft payload: {err}"))
                })?
            }
            (outcome, _) => {
                return Err(FanoutError::OrchestrationError(format!(
                    "no report produced: {draft_task} {}",
                    describe(outcome)
                )));
            }
        },
        None => {
            return Err(FanoutError::OrchestrationError(format!(
                "no report produced: {draft_task} never ran"
            )));
        }
    };

    let verdict: Option<CritiqueVerdict> = results
        .get(CRITIQUE_TASK)
        .filter(|result| result.outcome.is_success())
        .and_then(|result| result.output.clone())
        .and_then(|output| serde_json::from_value(output).ok());

    let mut report = Report::new(
        options.topic.trim(),
        draft.title,
        draft.body_markdown,
        draft.sources,
    );
    match &verdict {
        Some(verdict) => {
            report.requires_review = !verdict.passed;
            report.review_notes = if report.requires_review {
                review_notes(verdict)
            } else {
                verdict.notes.clone()
            };
        }
        None => {
            report.requires_review = true;
            report.review_notes = vec!["Fact-checking did not complete.".to_string()];
        }
    }

    let output_dir = options
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output.dir.clone());
    let suffix = report_suffix(&report, &run_id, if deep { "_full" } else { "_report" });
    let report_path = write_report(&output_dir, &report, &suffix)?;
    info!(
        path = %report_path.display(),
        requires_review = report.requires_review,
        "Report written"
    );

    let pdf_path = if options.export_pdf {
        match BrowserPdfExporter::new(&config.output.pdf_program)
            .export(&report, &report_path)
            .await
        {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(error = %err, "PDF export failed; Markdown report kept");
                None
            }
        }
    } else {
        None
    };

    events.drain_pending();
    let trace = TraceSummary::from_events(events.events());
    let (trace_path, trace_summary_path) = if options.persist_trace {
        let trace_dir = output_dir.join("traces");
        let events_path = persist_events(&trace_dir, &run_id, events.events())?;
        let summary_path = persist_trace_summary(&trace_dir, &run_id, &trace)?;
        (Some(events_path), Some(summary_path))
    } else {
        (None, None)
    };

    if let Some(settings) = &options.run_log {
        let entry = RunLogInput {
            run_id: run_id.clone(),
            topic: report.topic.clone(),
            mode: if deep { "deep" } else { "quick" }.to_string(),
            sub_queries: planned.search_queries.clone(),
            report_path: Some(report_path.display().to_string()),
            verdict: verdict.as_ref().map(CritiqueVerdict::summary),
            confidence: verdict.as_ref().map(|v| v.confidence),
            requires_review: report.requires_review,
            sources: report.cited_sources().iter().map(|s| s.url.clone()).collect(),
            trace_path: trace_path.as_ref().map(|p| p.display().to_string()),
        };
        if let Err(err) = log_run_completion(settings, entry) {
            warn!(error = %err, "Failed to append run log");
        }
    }

    Ok(ResearchOutcome {
        run_id,
        report,
        verdict,
        report_path,
        pdf_path,
        execution: execution.report,
        trace,
        trace_path,
        trace_summary_path,
        sub_queries: planned.search_queries,
        sections: planned.sections,
    })
}

struct PlannedRun {
    graph: TaskGraph,
    search_queries: Vec<String>,
    sections: Vec<Section>,
}

async fn plan(
    config: &Config,
    services: &ResearchServices,
    options: &ResearchOptions,
    deep: bool,
    collector: &EventCollector,
) -> Result<PlannedRun, FanoutError> {
    let started = Instant::now();
    collector.emit_start(
        SUPERVISOR_TASK.to_string(),
        AgentRole::Supervisor,
        format!("Plan research for: {}", options.topic),
    );

    let supervisor = SupervisorAgent::new(services.llm.clone(), &config.llm.model);
    let planner = ResearchPlanner::new(config.critic.min_confidence);

    let planned = if deep {
        let sections = if !options.sections.is_empty() {
            options.sections.clone()
        } else if !options.queries.is_empty() {
            let query = Query::new(&options.topic, &options.queries)?;
            query
                .sub_queries
                .into_iter()
                .map(|q| Section {
                    title: q.clone(),
                    objective: q,
                })
                .collect()
        } else {
            supervisor.plan_outline(&options.topic).await?
        };
        let graph = planner.plan_sections(options.topic.trim(), &sections)?;
        PlannedRun {
            graph,
            search_queries: sections.iter().map(|s| s.objective.clone()).collect(),
            sections,
        }
    } else {
        let query = if options.queries.is_empty() {
            supervisor
                .plan_queries(&options.topic, config.planner.sub_query_count)
                .await?
        } else {
            Query::new(&options.topic, &options.queries)?
        };
        PlannedRun {
            graph: planner.plan_queries(&query)?,
            search_queries: query.sub_queries,
            sections: Vec::new(),
        }
    };

    collector.emit_message(
        SUPERVISOR_TASK.to_string(),
        None,
        AgentRole::Supervisor,
        format!("Planned {} searches", planned.search_queries.len()),
        serde_json::json!({"queries": planned.search_queries}),
    );
    collector.emit_finish(
        SUPERVISOR_TASK.to_string(),
        AgentRole::Supervisor,
        TaskOutcome::Success,
        started.elapsed().as_millis() as u64,
    );
    Ok(planned)
}

struct Executed {
    report: ExecutionReport,
    results: HashMap<TaskId, TaskResult>,
}

async fn execute(
    config: &Config,
    services: &ResearchServices,
    graph: &TaskGraph,
    collector: &EventCollector,
) -> Result<Executed, FanoutError> {
    let engine = FanoutEngine::new(
        services.providers.clone(),
        FanoutSettings::from(&config.fanout),
    );

    let mut critic = CriticAgent::new(config.critic.min_confidence);
    if config.critic.llm_review {
        critic = critic.with_llm_review(services.llm.clone(), &config.llm.model);
    }

    let dispatcher = AgentDispatcher::new(collector.clone())
        .register(ResearcherAgent::new(engine))
        .register(ExecutorAgent::new(
            services.llm.clone(),
            config.cheap_model(),
            config.executor.clone(),
        ))
        .register(AnalystAgent::new(
            services.llm.clone(),
            &config.llm.model,
            config.synthesis.clone(),
        ))
        .register(critic);

    let orchestrator = Orchestrator::new(
        OrchestratorConfig {
            max_concurrent_tasks: config.planner.max_concurrent_tasks,
            retry: RetryPolicy::new(
                config.planner.max_task_retries,
                config.fanout.initial_backoff_ms,
                config.fanout.max_backoff_ms,
            ),
        },
        collector.clone(),
    );

    let report = orchestrator.execute(graph, &dispatcher).await?;
    info!(
        successful = report.successful_tasks,
        failed = report.failed_tasks,
        skipped = report.skipped_tasks,
        duration_ms = report.duration_ms,
        "Task graph finished"
    );
    Ok(Executed {
        report,
        results: orchestrator.get_results().await,
    })
}

fn describe(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Success => "succeeded without output".to_string(),
        TaskOutcome::Failure { reason, .. } => format!("failed: {reason}"),
        TaskOutcome::Skipped => "was skipped because its inputs failed".to_string(),
    }
}

/// Topics without a single letter or digit share the fallback stem, so the
/// run id keeps their files apart.
fn report_suffix(report: &Report, run_id: &str, mode: &str) -> String {
    if report.topic.chars().any(char::is_alphanumeric) {
        mode.to_string()
    } else {
        let short: String = run_id.chars().take(8).collect();
        format!("_{short}{mode}")
    }
}

fn review_notes(verdict: &CritiqueVerdict) -> Vec<String> {
    let mut notes = vec![verdict.summary()];
    if !verdict.unknown_citations.is_empty() {
        notes.push(format!(
            "{} citation(s) name sources that were never retrieved",
            verdict.unknown_citations.len()
        ));
    }
    notes.extend(
        verdict
            .unsupported
            .iter()
            .map(|claim| format!("Uncited: \"{claim}\"")),
    );
    notes.extend(verdict.notes.iter().cloned());
    notes
}
