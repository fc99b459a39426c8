// crates/pipecli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipecore::{AgentEvent, ExecutionEvent, ExecutionState};
use piperuntime::{DriverKind, ExecutionHandle, ExecutionResult, Orchestrator, RuntimeConfig};
use pipestages::{
    fields, review_registry, HeuristicReasoner, ReasoningService, ReviewAssembler, ReviewSummary,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Document review pipeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Review a document
    Run {
        /// Path to the document to review
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Document text given inline
        #[arg(short, long)]
        text: Option<String>,

        /// Runtime configuration JSON file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the driver (dag or sequential)
        #[arg(long)]
        driver: Option<DriverKind>,

        /// Override the refinement ceiling
        #[arg(long)]
        max_refinements: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Print the summary as JSON instead of progress output
        #[arg(long)]
        json: bool,
    },

    /// List the review stages
    Stages,

    /// Print the sequential execution plan
    Plan,

    /// Write a default runtime configuration
    Init {
        /// Output file path
        #[arg(short, long, default_value = "pipeline.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            text,
            config,
            driver,
            max_refinements,
            verbose,
            json,
        } => {
            init_logging(verbose);

            let mut runtime_config = match config {
                Some(path) => RuntimeConfig::from_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => RuntimeConfig::default(),
            };
            if let Some(driver) = driver {
                runtime_config.driver = driver;
            }
            if let Some(max) = max_refinements {
                runtime_config.max_refinements = max;
            }
            tracing::debug!(config = ?runtime_config, "Runtime configuration");

            let document = match (file, text) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, Some(text)) => text,
                (None, None) => anyhow::bail!("provide a document with --file or --text"),
            };

            run_review(runtime_config, document, json).await?;
        }

        Commands::Stages => {
            list_stages()?;
        }

        Commands::Plan => {
            print_plan()?;
        }

        Commands::Init { output } => {
            create_default_config(output)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn reasoner() -> Arc<dyn ReasoningService> {
    Arc::new(HeuristicReasoner::new())
}

async fn run_review(config: RuntimeConfig, document: String, as_json: bool) -> Result<()> {
    let orchestrator = Orchestrator::with_config(config);

    if !as_json {
        println!("🚀 Reviewing {} characters", document.len());
        println!("   Driver: {:?}", orchestrator.config().driver);
        println!("   Max refinements: {}", orchestrator.config().max_refinements);
        println!();
    }

    // Subscribe to events for real-time output
    let mut events = orchestrator.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if !as_json {
                print_event(event);
            }
        }
    });

    let handle = ExecutionHandle::new();
    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let initial = ExecutionState::new().with_field(fields::DOCUMENT, document);
    let outcome = orchestrator
        .run(|| review_registry(reasoner()), initial, &ReviewAssembler, &handle)
        .await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let outcome = outcome?;
    if as_json {
        let report = json!({
            "summary": outcome.summary,
            "execution": execution_json(&outcome.execution),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&outcome.summary, &outcome.execution);
    }

    Ok(())
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted { driver, agents, .. } => {
            println!("▶️  Run started ({} driver, {} agents)", driver, agents);
        }
        ExecutionEvent::RoundStarted { round, agents, .. } => {
            println!("  🔁 Round {}: {}", round, agents.join(", "));
        }
        ExecutionEvent::AgentStarted { .. } => {}
        ExecutionEvent::AgentCompleted { agent_id, duration_ms, .. } => {
            println!("  ✅ {} completed in {}ms", agent_id, duration_ms);
        }
        ExecutionEvent::AgentFailed { agent_id, error, .. } => {
            println!("  ❌ {} failed: {}", agent_id, error);
        }
        ExecutionEvent::AgentDegraded { agent_id, error, .. } => {
            println!("  ⚠️  {} degraded: {}", agent_id, error);
        }
        ExecutionEvent::RefinementTriggered { count, max, rerun, .. } => {
            println!("  🔧 Refinement {}/{}: re-running {}", count, max, rerun.join(", "));
        }
        ExecutionEvent::Agent { agent_id, event, .. } => match event {
            AgentEvent::Info { message } => {
                println!("     ℹ️  [{}] {}", agent_id, message);
            }
            AgentEvent::Warning { message } => {
                println!("     ⚠️  [{}] {}", agent_id, message);
            }
            AgentEvent::Progress { percent, message } => {
                if let Some(msg) = message {
                    println!("     📊 [{}] {}% - {}", agent_id, percent, msg);
                } else {
                    println!("     📊 [{}] {}%", agent_id, percent);
                }
            }
        },
        ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
            if success {
                println!("✨ Run completed in {}ms", duration_ms);
            } else {
                println!("💥 Run failed after {}ms", duration_ms);
            }
        }
    }
}

fn print_summary(summary: &ReviewSummary, execution: &ExecutionResult) {
    println!();
    println!("📊 Review Summary:");
    println!("   Status: {:?}", summary.status);
    println!("   Score: {:.1}", summary.overall_score);
    println!("   Confidence: {:.2}", summary.confidence);
    println!("   Sentiment: {}", summary.sentiment);
    if !summary.risk_flags.is_empty() {
        println!("   Risk flags: {}", summary.risk_flags.join(", "));
    }
    for issue in &summary.compliance_issues {
        println!("   Compliance: {}", issue);
    }
    println!("   Refinements: {}", summary.refinements);
    println!("   {}", summary.headline);

    println!();
    println!("⏱️  Execution:");
    println!("   Execution ID: {}", execution.execution_id);
    println!("   Rounds: {}", execution.frontiers.len());
    println!("   Order: {}", execution.execution_order.join(" → "));
    println!("   Elapsed: {}ms", execution.total_elapsed.as_millis());
    println!("   Parallelization: {:.2}x", execution.parallelization_ratio());
    if !execution.skipped.is_empty() {
        println!("   Skipped: {}", execution.skipped.join(", "));
    }
}

fn execution_json(execution: &ExecutionResult) -> serde_json::Value {
    json!({
        "execution_id": execution.execution_id,
        "driver": execution.driver,
        "execution_order": execution.execution_order,
        "frontiers": execution.frontiers,
        "refinements": execution.refinements,
        "skipped": execution.skipped,
        "degraded": execution.degraded,
        "blocked": execution.blocked,
        "elapsed_ms": execution.total_elapsed.as_millis() as u64,
        "parallelization_ratio": execution.parallelization_ratio(),
        "final_state": execution.final_state.to_json(),
    })
}

fn list_stages() -> Result<()> {
    println!("📦 Review Stages:");
    println!();

    let registry = review_registry(reasoner())?;
    for spec in registry.iter() {
        let marker = if spec.is_refinement() { " (refinement)" } else { "" };
        println!("  • {}{}", spec.id, marker);
        println!("    {}", spec.agent.description());
        if !spec.dependencies.is_empty() {
            let deps: Vec<String> = spec
                .dependencies
                .iter()
                .map(|dep| {
                    if dep.is_conditional() {
                        format!("{}?", dep.target)
                    } else {
                        dep.target.clone()
                    }
                })
                .collect();
            println!("    depends on: {}", deps.join(", "));
        }
        println!("    owns: {}", spec.owns.join(", "));
    }
    Ok(())
}

fn print_plan() -> Result<()> {
    let registry = review_registry(reasoner())?;
    let order = registry.topological_order()?;

    println!("📋 Sequential plan ({} stages):", order.len());
    for (position, id) in order.iter().enumerate() {
        println!("  {}. {}", position + 1, id);
    }
    if let Some(refiner) = registry.refinement_agent() {
        println!();
        println!(
            "  {} re-runs {} until quality passes or the ceiling is reached",
            refiner.id,
            refiner.refines.join(", ")
        );
    }
    Ok(())
}

fn create_default_config(output: PathBuf) -> Result<()> {
    let json = serde_json::to_string_pretty(&RuntimeConfig::default())?;
    std::fs::write(&output, json)?;

    println!("✨ Created runtime config: {}", output.display());
    println!();
    println!("Run a review with it:");
    println!("  pipeline run --config {} --text 'Quarterly results were strong.'", output.display());

    Ok(())
}
