use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use deepfanout_agents::{ResearchOptions, ResearchServices, run_research_with};
use deepfanout_core::search::StaticProvider;
use deepfanout_core::{
    Config, FanoutError, LlmClient, LlmError, LlmRequest, LogSettings, SearchError,
    extract_citations,
};
use tempfile::TempDir;

/// Answers every agent prompt; drafts cite whatever sources they are shown.
struct CitingLlm {
    uncited_paragraphs: usize,
}

#[async_trait]
impl LlmClient for CitingLlm {
    async fn complete(&self, request: LlmRequest) -> Result<String, LlmError> {
        let prompt = request.input;
        if prompt.contains("You are a Critic") {
            return Ok(r#"["Grant figure is unsourced"]"#.into());
        }
        if prompt.contains("Research Planner") {
            return Ok(r#"["heat pump efficiency", "heat pump installation cost"]"#.into());
        }
        if prompt.contains("Research Director") {
            return Ok(r#"```json
[{"title": "Market", "objective": "heat pump market growth"},
 {"title": "Policy", "objective": "heat pump subsidies"}]
```"#
                .into());
        }
        if prompt.contains("research Executor") {
            return Ok("The source reports steady efficiency gains.".into());
        }
        if prompt.contains("SOURCES:") {
            let mut body = String::from("## Findings\n\n");
            for (idx, id) in extract_citations(&prompt).iter().enumerate() {
                body.push_str(&format!(
                    "Finding number {} is backed by the retrieved evidence [src:{id}].\n\n",
                    idx + 1
                ));
            }
            for _ in 0..self.uncited_paragraphs {
                body.push_str("This statement was written without any supporting source.\n\n");
            }
            return Ok(body);
        }
        Err(LlmError::Malformed("unexpected prompt".into()))
    }
}

fn services(uncited_paragraphs: usize, provider: StaticProvider) -> ResearchServices {
    ResearchServices {
        llm: Arc::new(CitingLlm { uncited_paragraphs }),
        providers: vec![Arc::new(provider)],
    }
}

fn providers() -> StaticProvider {
    StaticProvider::new("tavily")
        .with_hit("https://energy.example/heat-pumps", Some(0.92))
        .with_hit("https://stats.example/cop", Some(0.81))
        .with_hit("https://blog.example/noise", Some(0.30))
}

fn config() -> Config {
    let mut config = Config::default();
    config.fanout.initial_backoff_ms = 1;
    config.fanout.max_backoff_ms = 5;
    config
}

fn options(topic: &str, out: &Path) -> ResearchOptions {
    ResearchOptions::new(topic)
        .with_output_dir(out)
        .with_run_log(Some(LogSettings {
            base_dir: out.join("logs"),
            retention_days: 0,
        }))
}

#[tokio::test]
async fn quick_run_writes_a_cited_report() {
    let temp = TempDir::new().unwrap();
    let outcome = run_research_with(
        &config(),
        services(0, providers()),
        options("Heat pumps", temp.path()).with_trace(true),
    )
    .await
    .unwrap();

    assert_eq!(outcome.sub_queries.len(), 2);
    assert_eq!(outcome.execution.total_tasks, 6);
    assert_eq!(outcome.execution.failed_tasks, 0);
    assert!(outcome.report_path.ends_with("heat_pumps_report.md"));

    let verdict = outcome.verdict.as_ref().unwrap();
    assert!(verdict.passed, "{}", verdict.summary());
    assert!(!outcome.requires_review());

    let markdown = std::fs::read_to_string(&outcome.report_path).unwrap();
    assert!(markdown.starts_with("# Research Report: Heat pumps"));
    assert!(markdown.contains("## Sources"));
    assert!(markdown.contains("https://energy.example/heat-pumps"));
    assert!(!markdown.contains("https://blog.example/noise"));

    assert!(outcome.trace_path.as_ref().unwrap().exists());
    let summary = std::fs::read_to_string(outcome.trace_summary_path.as_ref().unwrap()).unwrap();
    assert!(summary.contains("### Trace Summary"));
    assert!(summary.contains("```mermaid"));
    assert!(summary.contains("synthesize"));
    assert!(outcome.trace.steps.iter().any(|step| step.task_id == "plan"));
    assert!(temp.path().join("logs").exists());
}

#[tokio::test]
async fn deep_run_assembles_chapters() {
    let temp = TempDir::new().unwrap();
    let outcome = run_research_with(
        &config(),
        services(0, providers()),
        options("Heat pumps", temp.path()).deep(true),
    )
    .await
    .unwrap();

    assert_eq!(outcome.sections.len(), 2);
    assert_eq!(outcome.execution.total_tasks, 2 * 3 + 2);
    assert!(outcome.report_path.ends_with("heat_pumps_full.md"));
    assert_eq!(outcome.report.title, "Master Report: Heat pumps");

    let body = &outcome.report.body_markdown;
    let market = body.find("## Market").unwrap();
    let policy = body.find("## Policy").unwrap();
    assert!(market < policy);
    assert!(outcome.verdict.as_ref().unwrap().passed);
}

#[tokio::test]
async fn explicit_queries_skip_planning() {
    let temp = TempDir::new().unwrap();
    let outcome = run_research_with(
        &config(),
        services(0, providers()),
        options("Heat pumps", temp.path())
            .with_queries(vec!["air source heat pump COP".into()])
            .with_run_log(None),
    )
    .await
    .unwrap();

    assert_eq!(outcome.sub_queries, vec!["air source heat pump COP"]);
    assert_eq!(outcome.execution.total_tasks, 4);
}

#[tokio::test]
async fn passing_report_keeps_llm_reviewer_notes() {
    let temp = TempDir::new().unwrap();
    let mut config = config();
    config.critic.llm_review = true;

    let outcome = run_research_with(
        &config,
        services(0, providers()),
        options("Heat pumps", temp.path()).with_run_log(None),
    )
    .await
    .unwrap();

    assert!(!outcome.requires_review());
    assert_eq!(outcome.report.review_notes, vec!["Grant figure is unsourced"]);
    let markdown = std::fs::read_to_string(&outcome.report_path).unwrap();
    assert!(markdown.contains("> **Reviewer notes:**"));
    assert!(markdown.contains("> - Grant figure is unsourced"));
}

#[tokio::test]
async fn non_latin_topic_keeps_its_own_file_name() {
    let temp = TempDir::new().unwrap();
    let outcome = run_research_with(
        &config(),
        services(0, providers()),
        options("日本の電池市場", temp.path()).with_run_log(None),
    )
    .await
    .unwrap();

    assert!(outcome.report_path.ends_with("日本の電池市場_report.md"));
}

#[tokio::test]
async fn symbol_only_topics_do_not_overwrite_each_other() {
    let temp = TempDir::new().unwrap();
    let mut paths = Vec::new();
    for _ in 0..2 {
        let outcome = run_research_with(
            &config(),
            services(0, providers()),
            options("???", temp.path()).with_run_log(None),
        )
        .await
        .unwrap();
        let name = outcome.report_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(&format!("report_{}", &outcome.run_id[..8])));
        assert!(name.ends_with("_report.md"));
        paths.push(outcome.report_path);
    }
    assert_ne!(paths[0], paths[1]);
    assert!(paths.iter().all(|path| path.exists()));
}

#[tokio::test]
async fn uncited_claims_flag_the_report_for_review() {
    let temp = TempDir::new().unwrap();
    let outcome = run_research_with(
        &config(),
        services(4, providers()),
        options("Heat pumps", temp.path()).with_run_log(None),
    )
    .await
    .unwrap();

    let verdict = outcome.verdict.as_ref().unwrap();
    assert!(!verdict.passed);
    assert!(verdict.confidence < 0.75);
    assert!(outcome.requires_review());

    let markdown = std::fs::read_to_string(&outcome.report_path).unwrap();
    assert!(markdown.contains("**Review suggested:**"));
}

#[tokio::test]
async fn failing_providers_produce_no_report() {
    let temp = TempDir::new().unwrap();
    let provider = StaticProvider::new("tavily").failing_with(vec![SearchError::Status {
        status: 403,
        body: "forbidden".into(),
    }]);

    let err = run_research_with(
        &config(),
        services(0, provider),
        options("Heat pumps", temp.path())
            .with_queries(vec!["heat pump".into()])
            .with_run_log(None),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, FanoutError::OrchestrationError(_)));
    assert!(err.to_string().contains("no report produced"));
}

#[tokio::test]
async fn blank_topic_is_rejected() {
    let temp = TempDir::new().unwrap();
    let err = run_research_with(
        &config(),
        services(0, providers()),
        options("   ", temp.path()).with_run_log(None),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));
}
