use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use deepfanout_agents::{ResearchOptions, SupervisorAgent, run_research};
use deepfanout_core::llm::OpenAiResponsesClient;
use deepfanout_core::source::truncate_chars;
use deepfanout_core::{
    Config, ConfigLoader, FanoutError, TelemetryOptions, init_telemetry, metrics, run_fanout,
};
use tokio::runtime::Runtime;
use tracing::{error, info, warn};

const PREVIEW_CHARS: usize = 500;

#[derive(Parser, Debug)]
#[command(
    name = "deepfanout",
    version,
    about = "Multi-agent web research with concurrent search fan-out"
)]
struct Cli {
    /// Configuration file (defaults to $DEEPFANOUT_CONFIG, then ./deepfanout.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search every provider for each query and print the surviving sources as JSON.
    Fanout(FanoutArgs),
    /// Run the full research workflow and write a report.
    Run(RunArgs),
    /// Show the Supervisor's plan without searching.
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
struct FanoutArgs {
    /// Research topic.
    topic: String,

    /// Sub-queries to search (defaults to the topic itself).
    #[arg(long, num_args = 1..)]
    queries: Vec<String>,

    /// Override the relevance threshold (0.0 - 1.0).
    #[arg(long)]
    threshold: Option<f64>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Research topic.
    topic: String,

    /// Sub-queries to search instead of asking the Supervisor.
    #[arg(long, num_args = 1..)]
    queries: Vec<String>,

    /// Deep mode: outline, one chapter per section, master report.
    #[arg(long)]
    deep: bool,

    /// Directory for the report (overrides `output.dir`).
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Also export the report as PDF through the browser tool.
    #[arg(long)]
    pdf: bool,

    /// Persist the run's event trace under `<output>/traces`.
    #[arg(long)]
    trace: bool,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Research topic.
    topic: String,

    /// Plan a deep-mode outline instead of sub-queries.
    #[arg(long)]
    deep: bool,

    /// Number of sub-queries (overrides `planner.sub_query_count`).
    #[arg(long)]
    count: Option<usize>,
}

fn main() -> ExitCode {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match ConfigLoader::load(cli.config.clone()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::from(2);
        }
    };

    if let Err(err) = init_telemetry(TelemetryOptions {
        env_filter: Some(config.logging.level.clone()),
        ..TelemetryOptions::default()
    }) {
        eprintln!("warning: {err}");
    }
    metrics::init_metrics_from_env("deepfanout");

    let result = Runtime::new()
        .context("failed to start tokio runtime")
        .and_then(|rt| {
            rt.block_on(async {
                match cli.command {
                    Command::Fanout(args) => fanout_command(&config, args).await,
                    Command::Run(args) => run_command(&config, args).await,
                    Command::Plan(args) => plan_command(&config, args).await,
                }
            })
        });

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("error: {err:#}");
            ExitCode::from(exit_status(&err))
        }
    }
}

/// 2 for configuration problems, 1 for everything else.
fn exit_status(err: &anyhow::Error) -> u8 {
    let configuration = err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<FanoutError>())
        .any(FanoutError::is_configuration);
    if configuration { 2 } else { 1 }
}

async fn fanout_command(config: &Config, args: FanoutArgs) -> Result<ExitCode> {
    let mut config = config.clone();
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(FanoutError::InvalidConfiguration(format!(
                "threshold must be within [0, 1], got {threshold}"
            ))
            .into());
        }
        config.fanout.relevance_threshold = threshold;
    }

    let report = run_fanout(&config, &args.topic, &args.queries).await?;
    info!(
        records = report.records.len(),
        failures = report.failures.len(),
        discarded = report.discarded_below_threshold,
        duplicates = report.duplicates,
        duration_ms = report.duration_ms,
        "Fan-out complete"
    );
    for failure in &report.failures {
        warn!(
            provider = %failure.provider,
            query = %failure.query,
            error = %failure.error,
            "Request failed"
        );
    }

    println!("{}", serde_json::to_string_pretty(&report.records)?);
    Ok(ExitCode::SUCCESS)
}

async fn run_command(config: &Config, args: RunArgs) -> Result<ExitCode> {
    let mut options = ResearchOptions::new(&args.topic)
        .with_queries(args.queries)
        .with_pdf(args.pdf)
        .with_trace(args.trace);
    if args.deep {
        options = options.deep(true);
    }
    if let Some(dir) = args.output_dir {
        options = options.with_output_dir(dir);
    }

    let outcome = run_research(config, options).await?;

    println!("Report saved to {}", outcome.report_path.display());
    match &outcome.pdf_path {
        Some(path) => println!("PDF saved to {}", path.display()),
        None if args.pdf => eprintln!("warning: PDF export failed; see the log for details"),
        None => {}
    }
    if let Some(path) = &outcome.trace_path {
        println!("Trace saved to {}", path.display());
    }
    if let Some(path) = &outcome.trace_summary_path {
        println!("Trace summary saved to {}", path.display());
    }
    if let Some(verdict) = &outcome.verdict {
        println!("Critic: {}", verdict.summary());
    }

    let markdown = outcome.report.render_markdown();
    println!("\n--- Preview ---\n{}", truncate_chars(&markdown, PREVIEW_CHARS));

    if outcome.requires_review() {
        Ok(ExitCode::from(3))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn plan_command(config: &Config, args: PlanArgs) -> Result<ExitCode> {
    let llm = OpenAiResponsesClient::new(config.llm_api_key()?, &config.llm)?;
    let supervisor = SupervisorAgent::new(Arc::new(llm), &config.llm.model);

    let plan = if args.deep {
        serde_json::to_value(supervisor.plan_outline(&args.topic).await?)?
    } else {
        let count = args.count.unwrap_or(config.planner.sub_query_count);
        serde_json::to_value(supervisor.plan_queries(&args.topic, count).await?.sub_queries)?
    };

    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_flags() {
        let cli = Cli::parse_from([
            "deepfanout",
            "run",
            "solid state batteries",
            "--queries",
            "cost",
            "safety",
            "--deep",
            "--pdf",
            "--config",
            "custom.toml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.topic, "solid state batteries");
                assert_eq!(args.queries, vec!["cost", "safety"]);
                assert!(args.deep && args.pdf && !args.trace);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn configuration_errors_map_to_exit_code_two() {
        let err = anyhow::Error::from(FanoutError::MissingSecret("OPENAI_API_KEY".into()));
        assert_eq!(exit_status(&err), 2);

        let err = anyhow::Error::from(FanoutError::OrchestrationError("boom".into()))
            .context("research run failed");
        assert_eq!(exit_status(&err), 1);
    }
}
