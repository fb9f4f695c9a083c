use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::events::{Event, TaskOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub task_id: String,
    pub message: String,
}

/// Human-readable condensation of a run's events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    /// One step per finished task and per agent message; start events are
    /// implied by their finish and are skipped.
    pub fn from_events(events: &[Event]) -> Self {
        let steps = events
            .iter()
            .filter_map(|event| match event {
                Event::Start { .. } => None,
                Event::Finish {
                    task_id,
                    role,
                    outcome,
                    duration_ms,
                    ..
                } => Some((
                    task_id.clone(),
                    format!("{} {} in {duration_ms} ms", role.as_str(), describe(outcome)),
                )),
                Event::Message {
                    from_task,
                    content,
                    ..
                } => Some((from_task.clone(), content.clone())),
            })
            .enumerate()
            .map(|(idx, (task_id, message))| TraceStep {
                index: idx + 1,
                task_id,
                message,
            })
            .collect();
        Self { steps }
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Trace Summary\n");
        for step in &self.steps {
            let _ = writeln!(output, "{}. {} → {}", step.index, step.task_id, step.message);
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        if self.steps.is_empty() {
            return "flowchart TD\n  %% no trace events captured".to_string();
        }

        let mut output = String::from("flowchart TD\n  %% auto-generated trace\n");
        for step in &self.steps {
            let node_id = format!("step{}", step.index);
            let label = sanitize_mermaid(&format!("{}: {}", step.task_id, step.message));
            let _ = writeln!(output, "  {node_id}[\"{label}\"]");
        }

        for idx in 1..self.steps.len() {
            let _ = writeln!(output, "  step{idx} --> step{}", idx + 1);
        }

        output
    }
}

/// Write `<dir>/<run_id>.md`: the step list plus a fenced Mermaid flowchart.
pub fn persist_trace_summary<P: AsRef<Path>>(
    dir: P,
    run_id: &str,
    summary: &TraceSummary,
) -> anyhow::Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{run_id}.md"));
    let document = format!(
        "# Run {run_id}\n\n{}\n\n```mermaid\n{}\n```\n",
        summary.render_markdown().trim_end(),
        summary.render_mermaid().trim_end()
    );
    std::fs::write(&path, document)
        .with_context(|| format!("failed to write trace summary {}", path.display()))?;
    Ok(path)
}

fn describe(outcome: &TaskOutcome) -> String {
    match outcome {
        TaskOutcome::Success => "succeeded".to_string(),
        TaskOutcome::Failure { reason, .. } => format!("failed ({reason})"),
        TaskOutcome::Skipped => "skipped".to_string(),
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventCollector;
    use crate::planner::AgentRole;

    fn sample_events() -> Vec<Event> {
        let (collector, mut receiver) = EventCollector::new();
        collector.emit_start("research_1".into(), AgentRole::Researcher, "Research".into());
        collector.emit_message(
            "research_1".into(),
            None,
            AgentRole::Researcher,
            "kept 12 sources [tavily]".into(),
            serde_json::Value::Null,
        );
        collector.emit_finish("research_1".into(), AgentRole::Researcher, TaskOutcome::Success, 42);
        drop(collector);

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn markdown_renders_steps() {
        let summary = TraceSummary::from_events(&sample_events());
        let markdown = summary.render_markdown();

        assert_eq!(summary.steps.len(), 2);
        assert!(markdown.contains("1. research_1 → kept 12 sources"));
        assert!(markdown.contains("Researcher succeeded in 42 ms"));
    }

    #[test]
    fn mermaid_escapes_brackets() {
        let mermaid = TraceSummary::from_events(&sample_events()).render_mermaid();
        assert!(mermaid.starts_with("flowchart TD"));
        assert!(mermaid.contains("(tavily)"));
        assert!(mermaid.contains("step1 --> step2"));
    }

    #[test]
    fn summary_file_holds_markdown_and_mermaid() {
        let dir = tempfile::tempdir().unwrap();
        let summary = TraceSummary::from_events(&sample_events());

        let path = persist_trace_summary(dir.path().join("traces"), "run-1", &summary).unwrap();
        assert!(path.ends_with("traces/run-1.md"));

        let document = std::fs::read_to_string(path).unwrap();
        assert!(document.starts_with("# Run run-1"));
        assert!(document.contains("### Trace Summary"));
        assert!(document.contains("```mermaid\nflowchart TD"));
    }

    #[test]
    fn empty_trace_renders_placeholder() {
        let summary = TraceSummary::default();
        assert_eq!(summary.render_markdown(), "No trace events recorded.");
    }
}
