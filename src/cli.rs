//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::DepthPreset;
use crate::repo::CommitSelection;
use clap::Parser;
use std::path::PathBuf;

/// YoScorer - multi-agent LLM commit evaluator
///
/// Scores commits with five role-based agents running on a local Ollama
/// model, reconciles their votes and ranks authors against their team.
///
/// Examples:
///   yoscorer --repo ./my-project --last 20
///   yoscorer --commit HEAD~1 --commit 3f2a9c1 --depth deep
///   yoscorer --branch main --last 50 --format json --output team.json
///   yoscorer --last 5 --dry-run
///   yoscorer --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Local git repository to evaluate
    #[arg(short, long, default_value = ".", value_name = "DIR")]
    pub repo: PathBuf,

    /// Revision to evaluate (repeatable)
    ///
    /// When given, --last and --branch are ignored.
    #[arg(long = "commit", value_name = "REV")]
    pub commits: Vec<String>,

    /// Number of most recent non-merge commits to evaluate
    #[arg(short, long, default_value = "10", value_name = "N")]
    pub last: usize,

    /// Branch to walk for --last (defaults to HEAD)
    #[arg(short, long, value_name = "BRANCH")]
    pub branch: Option<String>,

    /// Evaluation depth
    ///
    /// fast: one pass per agent; normal: up to 3 refinements; deep: up to 5.
    #[arg(short, long, value_name = "MODE")]
    pub depth: Option<DepthPreset>,

    /// Ollama model to use
    ///
    /// Can also be set via YOSCORER_MODEL env var or .yoscorer.toml config.
    #[arg(short, long, env = "YOSCORER_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds for a single model call
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Number of commits evaluated at the same time
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .yoscorer.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Exit with code 2 if any commit scores below this value
    ///
    /// Useful for CI pipelines.
    #[arg(long, value_name = "SCORE")]
    pub fail_below: Option<f64>,

    /// List the commits that would be evaluated without calling the model
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .yoscorer.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if !self.repo.is_dir() {
            return Err(format!(
                "Repository path is not a directory: {}",
                self.repo.display()
            ));
        }

        if self.commits.is_empty() && self.last == 0 {
            return Err("--last must be at least 1".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !self.dry_run && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        if let Some(threshold) = self.fail_below {
            if !(1.0..=10.0).contains(&threshold) {
                return Err("--fail-below must be between 1 and 10".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `general.verbose` from the config file; `--quiet`
    /// still wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Which commits the flags select.
    pub fn commit_selection(&self) -> CommitSelection {
        if self.commits.is_empty() {
            CommitSelection::Recent {
                branch: self.branch.clone(),
                limit: self.last,
            }
        } else {
            CommitSelection::Revisions(self.commits.clone())
        }
    }
}
