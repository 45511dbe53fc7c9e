//! Quorum CLI - route prompts across several LLM backends

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};

use quorum_ai::{
    ChatMessage, HttpGateway, InvocationOutcome, InvocationParams, InvocationResult, ModelCatalog,
    Orchestrator, OrchestratorSettings, StatsRecorder, StatsSummary,
};
use quorum_core::{QuorumConfig, init_logging};

#[derive(Parser)]
#[command(name = "quorum")]
#[command(author, version, about = "Route prompts to the best-suited LLM backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ~/.quorum/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Sampling temperature passed to the backends
    #[arg(long, global = true)]
    temperature: Option<f32>,

    /// Maximum tokens per backend reply
    #[arg(long, global = true)]
    max_tokens: Option<u32>,

    /// System message prepended to the prompt
    #[arg(long, global = true)]
    system: Option<String>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the prompt to the single best-suited model
    Route {
        prompt: String,
        /// Also print the routing decision and prompt analysis
        #[arg(short, long)]
        metadata: bool,
    },

    /// Ask every target model and return the answer the judge ranks best
    Best { prompt: String },

    /// Ask every target model and merge the answers
    Synthesize { prompt: String },

    /// Classify a prompt without routing it
    Analyze { prompt: String },

    /// List the model catalog
    Models,

    /// Summarize recorded routing statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.log_level)?;
    for issue in config.validate() {
        warn!("Config: {issue}");
        eprintln!("Warning: {issue}");
    }

    match cli.command {
        Commands::Stats => return cmd_stats(&config, cli.format),
        Commands::Models => {
            let (catalog, _) = build_catalog(&config);
            return cmd_models(&catalog, cli.format);
        }
        _ => {}
    }

    let (catalog, gateway) = build_catalog(&config);
    let stats = if config.stats_enabled {
        StatsRecorder::start(config.stats_path()?)?
    } else {
        StatsRecorder::disabled()
    };
    let orchestrator = Orchestrator::new(
        Arc::new(catalog),
        Arc::new(gateway),
        Arc::new(stats),
        OrchestratorSettings::from_config(&config),
    );

    let params = InvocationParams {
        temperature: cli.temperature,
        max_tokens: cli.max_tokens,
    };
    let outcome = run(&orchestrator, cli.command, cli.system.as_deref(), &params, cli.format).await;
    orchestrator.shutdown().await;
    outcome
}

/// Loads the config, refusing one that cannot serve any request.
fn load_config(path: Option<&Path>) -> Result<QuorumConfig> {
    let config = match path {
        Some(path) => QuorumConfig::load_from_path(path)?,
        None => QuorumConfig::load()?,
    };
    config.ensure_runnable().context("Invalid configuration")?;
    Ok(config)
}

/// Builds the catalog, disabling models whose provider has no API key.
fn build_catalog(config: &QuorumConfig) -> (ModelCatalog, HttpGateway) {
    let gateway = HttpGateway::from_config(config);
    let catalog = ModelCatalog::from_config(config);
    for provider in gateway.providers_without_credentials() {
        let disabled = catalog.disable_provider(&provider);
        if disabled > 0 {
            info!(%provider, disabled, "No API key; provider models disabled");
        }
    }
    (catalog, gateway)
}

fn messages(system: Option<&str>, prompt: String) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn run(
    orchestrator: &Orchestrator,
    command: Commands,
    system: Option<&str>,
    params: &InvocationParams,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Commands::Route { prompt, metadata } => {
            let routed = orchestrator
                .route_with_metadata(&messages(system, prompt), params)
                .await?;
            match format {
                OutputFormat::Json => print_json(&routed)?,
                OutputFormat::Text => {
                    if metadata {
                        println!("Model:      {}", routed.decision.selected);
                        println!(
                            "Category:   {} (confidence {:.2})",
                            routed.analysis.category, routed.analysis.confidence
                        );
                        println!("Reasoning:  {}", routed.decision.reasoning);
                        println!("Est. cost:  ${:.5}/1k tokens", routed.decision.estimated_cost_per_1k);
                        println!();
                    }
                    println!("{}", routed.content);
                }
            }
        }

        Commands::Best { prompt } => {
            let best = orchestrator
                .parallel_best(&messages(system, prompt), params)
                .await?;
            match format {
                OutputFormat::Json => print_json(&best)?,
                OutputFormat::Text => {
                    print_results(&best.results);
                    println!(
                        "Best: {}{}",
                        best.best_model,
                        if best.evaluation.degraded { " (judge unavailable, ranked by length)" } else { "" }
                    );
                    if !best.evaluation.reasoning.is_empty() {
                        println!("Why:  {}", best.evaluation.reasoning);
                    }
                    println!();
                    println!("{}", best.content);
                }
            }
        }

        Commands::Synthesize { prompt } => {
            let merged = orchestrator
                .parallel_synthesize(&messages(system, prompt), params)
                .await?;
            match format {
                OutputFormat::Json => print_json(&merged)?,
                OutputFormat::Text => {
                    print_results(&merged.results);
                    if merged.synthesis.degraded {
                        println!(
                            "Synthesis unavailable; showing best single response ({})",
                            merged.best_individual_model
                        );
                    } else {
                        println!(
                            "Synthesized from: {} (best individual: {})",
                            merged.synthesis.contributing_models.join(", "),
                            merged.best_individual_model
                        );
                    }
                    println!();
                    println!("{}", merged.content);
                }
            }
        }

        Commands::Analyze { prompt } => {
            let analysis = orchestrator.analyze(&prompt).await;
            match format {
                OutputFormat::Json => print_json(&analysis)?,
                OutputFormat::Text => {
                    println!("Category:   {}", analysis.category);
                    println!("Confidence: {:.2}", analysis.confidence);
                    for (key, value) in &analysis.features {
                        println!("  {key}: {value}");
                    }
                }
            }
        }

        Commands::Models | Commands::Stats => {}
    }
    Ok(())
}

fn print_results(results: &[InvocationResult]) {
    for r in results {
        let status = match r.outcome {
            InvocationOutcome::Ok => "ok".to_owned(),
            _ => format!(
                "{} ({})",
                r.outcome,
                r.error_detail.as_deref().unwrap_or("no detail")
            ),
        };
        println!("  {:<16} {:>6} ms  {status}", r.model_id, r.latency.as_millis());
    }
}

fn cmd_models(catalog: &ModelCatalog, format: OutputFormat) -> Result<()> {
    let snapshot = catalog.snapshot();
    if format == OutputFormat::Json {
        return print_json(&snapshot.all());
    }

    println!("{:<14} {:<10} {:>10}  {:<8} Strengths", "ID", "Provider", "$/1k", "Enabled");
    for m in snapshot.all() {
        println!(
            "{:<14} {:<10} {:>10.6}  {:<8} {}",
            m.id,
            m.provider,
            m.cost_per_1k_tokens,
            if m.enabled { "yes" } else { "no" },
            m.strength_tags.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}

fn cmd_stats(config: &QuorumConfig, format: OutputFormat) -> Result<()> {
    let path = config.stats_path()?;
    let summary = StatsSummary::load(&path)
        .with_context(|| format!("Failed to summarize {}", path.display()))?;
    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Text => {
            print!("{summary}");
            Ok(())
        }
    }
}
