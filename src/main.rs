//! YoScorer - multi-agent LLM commit evaluator
//!
//! A CLI tool that scores git commits with several role-based LLM agents,
//! reconciles their votes into a consensus and ranks authors against their
//! team with a volume-aware normalization.
//!
//! Exit codes:
//!   0 - Success (no commit below threshold, or no --fail-below set)
//!   1 - Runtime error (config, repository, model connection, etc.)
//!   2 - A commit scored below the --fail-below threshold

mod agent;
mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod pipeline;
mod repo;
mod report;

use agent::{OllamaInvoker, OllamaSettings, RolePromptBuilder};
use analysis::{build_author_scores, commits_below, TeamSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::{Config, CONFIG_FILE_NAME};
use models::{CommitContext, Report, ReportMetadata};
use pipeline::CommitEvaluator;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Configuration decides the default verbosity, so it is read before
    // logging starts and its source is reported afterwards.
    let (config, source) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&args, &config);

    info!("YoScorer v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    match source {
        ConfigSource::File(path) => info!("Loaded config from {}", path.display()),
        ConfigSource::Defaults => debug!("No config file found, using defaults"),
        ConfigSource::DefaultsAfterError(e) => warn!("Failed to load config: {}", e),
    }

    match run(args, config).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("Evaluation failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .yoscorer.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE_NAME);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize the model, depth, roster, weights and BACI settings.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level(config.general.verbose))
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete evaluation workflow. Returns the exit code (0 or 2).
async fn run(args: Args, mut config: Config) -> Result<i32> {
    let start_time = Instant::now();

    config.merge_with_args(&args);
    config.validate()?;

    // Step 1: Read the commits
    let repository = repo::open_repository(&args.repo)?;
    let selection = args.commit_selection();
    println!("📥 Reading commits from {}", args.repo.display());
    let commits = repo::collect_commits(
        &repository,
        &selection,
        config.agents.max_diff_chars,
        !args.quiet,
    )?;

    if args.dry_run {
        return Ok(handle_dry_run(&commits));
    }

    if commits.is_empty() {
        warn!("No commits matched the selection");
    }

    // Step 2: Set up the agents
    let depth = config.depth_mode();
    let invoker = OllamaInvoker::new(OllamaSettings::from(&config.model))?;
    println!("🤖 Initializing agents...");
    println!("   Model: {}", invoker.model_name());
    println!("   Ollama: {}", config.model.ollama_url);
    println!(
        "   Depth: {} (max {} iterations, clarity {:.2})",
        config.depth.mode.name(),
        depth.max_iterations,
        depth.clarity_threshold
    );
    println!(
        "   Roster: {}",
        config
            .agents
            .roster
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let evaluator =
        CommitEvaluator::from_config(&config, Arc::new(invoker), Arc::new(RolePromptBuilder))?;

    // Step 3: Evaluate
    println!("\n🔬 Evaluating {} commits...\n", commits.len());
    let evaluations = evaluator
        .evaluate_commits(commits, config.general.concurrency, !args.quiet)
        .await;

    // Step 4: Normalize authors and build the report
    println!("\n📝 Generating report...");
    let authors = build_author_scores(&evaluations, &config.baci)?;
    let summary = TeamSummary::from_evaluations(&evaluations, &authors);

    let report = Report {
        metadata: ReportMetadata {
            repository: args.repo.display().to_string(),
            evaluation_date: Utc::now(),
            model_used: config.model.name.clone(),
            depth_mode: config.depth.mode.name().to_string(),
            commits_evaluated: evaluations.len(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        commits: evaluations,
        authors,
        summary,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.output));
    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    print_summary(&report);
    println!(
        "\n✅ Evaluation complete! Report saved to: {}",
        output_path.display()
    );

    // Check --fail-below threshold
    if let Some(threshold) = args.fail_below {
        let below = commits_below(&report.commits, threshold);
        if !below.is_empty() {
            eprintln!(
                "\n⛔ {} commit(s) scored below {:.2}. Failing (exit code 2).",
                below.len(),
                threshold
            );
            for evaluation in below {
                eprintln!(
                    "   {} {:.2} {}",
                    evaluation.commit.short_hash(),
                    evaluation.commit_score().unwrap_or_default(),
                    evaluation.commit.subject()
                );
            }
            return Ok(2);
        }
    }

    Ok(0)
}

fn print_summary(report: &Report) {
    let summary = &report.summary;

    println!("\n📊 Evaluation Summary:");
    println!(
        "   Commits: {} evaluated, {} scored",
        summary.commits_evaluated, summary.commits_scored
    );
    if let Some(mean) = summary.mean_commit_score {
        println!("   Mean commit score: {:.2}", mean);
    }
    if let Some(top) = report.authors.first() {
        println!("   Top author: {} ({:.2})", top.author_name, top.score);
    }
    if summary.failed_agents > 0 || summary.forced_agents > 0 {
        println!(
            "   ⚠️  Failed agents: {} | Forced stops: {}",
            summary.failed_agents, summary.forced_agents
        );
    }
    println!(
        "   Tokens: {} in / {} out",
        summary.token_usage.input_tokens, summary.token_usage.output_tokens
    );
    println!("   Duration: {:.1}s", report.metadata.duration_seconds);
}

/// Handle --dry-run: print the selected commits and exit.
fn handle_dry_run(commits: &[CommitContext]) -> i32 {
    println!("\n🔍 Dry run: no model calls will be made.\n");

    if commits.is_empty() {
        println!("   No commits matched the selection.");
    } else {
        println!("   {} commits would be evaluated:\n", commits.len());
        for commit in commits {
            println!(
                "     {} {} <{}> +{}/-{} {}",
                commit.short_hash(),
                commit.author_name,
                commit.author_email,
                commit.insertions,
                commit.deletions,
                commit.subject()
            );
        }
    }

    println!("\n✅ Dry run complete.");
    0
}

/// Where the configuration came from.
enum ConfigSource {
    File(PathBuf),
    Defaults,
    DefaultsAfterError(String),
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigSource)> {
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigSource::File(config_path.clone())));
    }

    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigSource::File(PathBuf::from(CONFIG_FILE_NAME)))),
        Ok(None) => Ok((Config::default(), ConfigSource::Defaults)),
        Err(e) => Ok((Config::default(), ConfigSource::DefaultsAfterError(format!("{:#}", e)))),
    }
}
