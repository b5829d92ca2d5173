//! Configuration file handling.
//!
//! This module handles loading, validating and merging configuration from
//! `.yoscorer.toml` files, and resolves the depth mode and the consensus
//! weight table the evaluation core is given.

use crate::agent::ClarityWeights;
use crate::analysis::BaciConfig;
use crate::error::{EvalError, EvalResult};
use crate::models::{AgentRole, PillarMetric};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Name of the configuration file looked up by default.
pub const CONFIG_FILE_NAME: &str = ".yoscorer.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Iteration depth settings.
    #[serde(default)]
    pub depth: DepthConfig,

    /// Agent roster settings.
    #[serde(default)]
    pub agents: AgentsConfig,

    /// Per-role weight overrides, keyed by role then pillar.
    #[serde(default)]
    pub weights: BTreeMap<String, BTreeMap<String, f64>>,

    /// Author normalization settings.
    #[serde(default)]
    pub baci: BaciConfig,

    /// Clarity criterion weights.
    #[serde(default)]
    pub clarity: ClarityWeights,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Number of commits evaluated concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            concurrency: default_concurrency(),
        }
    }
}

fn default_output() -> String {
    "yoscore_report.md".to_string()
}

fn default_concurrency() -> usize {
    2
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Default model name.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

/// Named depth presets.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DepthPreset {
    /// One pass per agent, no self-refinement
    Fast,
    /// Up to three passes
    #[default]
    Normal,
    /// Up to five passes with a stricter clarity bar
    Deep,
}

impl DepthPreset {
    pub fn mode(&self) -> DepthMode {
        match self {
            DepthPreset::Fast => DepthMode {
                max_iterations: 1,
                clarity_threshold: 0.6,
                skip_self_refinement: true,
                token_budget_per_agent: 2048,
            },
            DepthPreset::Normal => DepthMode {
                max_iterations: 3,
                clarity_threshold: 0.8,
                skip_self_refinement: false,
                token_budget_per_agent: 4096,
            },
            DepthPreset::Deep => DepthMode {
                max_iterations: 5,
                clarity_threshold: 0.85,
                skip_self_refinement: false,
                token_budget_per_agent: 8192,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DepthPreset::Fast => "fast",
            DepthPreset::Normal => "normal",
            DepthPreset::Deep => "deep",
        }
    }
}

/// Iteration caps and budgets for one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthMode {
    pub max_iterations: u32,
    pub clarity_threshold: f64,
    pub skip_self_refinement: bool,
    /// Response token budget passed to every model call.
    pub token_budget_per_agent: u32,
}

impl Default for DepthMode {
    fn default() -> Self {
        DepthPreset::default().mode()
    }
}

impl DepthMode {
    pub fn validate(&self) -> EvalResult<()> {
        if self.max_iterations == 0 {
            return Err(EvalError::InvalidConfig(
                "depth.max_iterations must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.clarity_threshold) {
            return Err(EvalError::InvalidConfig(
                "depth.clarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.token_budget_per_agent == 0 {
            return Err(EvalError::InvalidConfig(
                "depth.token_budget_per_agent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Depth preset plus optional per-field overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthConfig {
    #[serde(default)]
    pub mode: DepthPreset,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarity_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_self_refinement: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget_per_agent: Option<u32>,
}

impl DepthConfig {
    /// The effective depth mode.
    pub fn resolve(&self) -> DepthMode {
        let preset = self.mode.mode();
        DepthMode {
            max_iterations: self.max_iterations.unwrap_or(preset.max_iterations),
            clarity_threshold: self.clarity_threshold.unwrap_or(preset.clarity_threshold),
            skip_self_refinement: self
                .skip_self_refinement
                .unwrap_or(preset.skip_self_refinement),
            token_budget_per_agent: self
                .token_budget_per_agent
                .unwrap_or(preset.token_budget_per_agent),
        }
    }
}

/// Agent roster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Roles that evaluate every commit.
    #[serde(default = "default_roster")]
    pub roster: Vec<AgentRole>,

    /// Wall-clock limit for one agent on one commit.
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_seconds: u64,

    /// Diffs longer than this are truncated before prompting.
    #[serde(default = "default_max_diff_chars")]
    pub max_diff_chars: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            roster: default_roster(),
            agent_timeout_seconds: default_agent_timeout(),
            max_diff_chars: default_max_diff_chars(),
        }
    }
}

fn default_roster() -> Vec<AgentRole> {
    AgentRole::ALL.to_vec()
}

fn default_agent_timeout() -> u64 {
    900
}

fn default_max_diff_chars() -> usize {
    40_000
}

/// Weight of an expert role on its own pillars.
const PRIMARY_WEIGHT: f64 = 0.40;
/// Weight of every other role.
const SECONDARY_WEIGHT: f64 = 0.15;

/// The role that owns a pillar in the default table.
fn primary_role(metric: PillarMetric) -> AgentRole {
    match metric {
        PillarMetric::FunctionalImpact | PillarMetric::IdealTimeHours => {
            AgentRole::BusinessAnalyst
        }
        PillarMetric::TestCoverage => AgentRole::Sdet,
        PillarMetric::CodeQuality => AgentRole::DeveloperReviewer,
        PillarMetric::ActualTimeHours => AgentRole::DeveloperAuthor,
        PillarMetric::CodeComplexity
        | PillarMetric::TechnicalDebtHours
        | PillarMetric::DebtReductionHours => AgentRole::SeniorArchitect,
    }
}

/// (role, pillar) -> weight in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    weights: HashMap<(AgentRole, PillarMetric), f64>,
}

impl Default for WeightTable {
    /// Each pillar's expert role weighs 0.40, the other four 0.15 each.
    fn default() -> Self {
        let mut table = Self::uniform(SECONDARY_WEIGHT);
        for metric in PillarMetric::ALL {
            table.set(primary_role(metric), metric, PRIMARY_WEIGHT);
        }
        table
    }
}

impl WeightTable {
    /// Same weight for every role and pillar.
    pub fn uniform(weight: f64) -> Self {
        let weights = AgentRole::ALL
            .iter()
            .flat_map(|role| PillarMetric::ALL.iter().map(move |m| ((*role, *m), weight)))
            .collect();
        Self { weights }
    }

    pub fn weight(&self, role: AgentRole, metric: PillarMetric) -> f64 {
        self.weights.get(&(role, metric)).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, role: AgentRole, metric: PillarMetric, weight: f64) {
        self.weights.insert((role, metric), weight);
    }

    /// Apply `[weights.<role>]` overrides from a config file.
    pub fn with_overrides(
        mut self,
        overrides: &BTreeMap<String, BTreeMap<String, f64>>,
    ) -> EvalResult<Self> {
        for (role_key, pillars) in overrides {
            let role = AgentRole::from_key(role_key).ok_or_else(|| {
                EvalError::InvalidConfig(format!("unknown agent role in weights: {}", role_key))
            })?;
            for (metric_key, weight) in pillars {
                let metric = PillarMetric::from_key(metric_key).ok_or_else(|| {
                    EvalError::InvalidConfig(format!("unknown pillar in weights: {}", metric_key))
                })?;
                if !(0.0..=1.0).contains(weight) {
                    return Err(EvalError::InvalidConfig(format!(
                        "weight for {}.{} must be between 0.0 and 1.0",
                        role_key, metric_key
                    )));
                }
                self.set(role, metric, *weight);
            }
        }
        Ok(self)
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// The effective depth mode.
    pub fn depth_mode(&self) -> DepthMode {
        self.depth.resolve()
    }

    /// The default weight table with this config's overrides applied.
    pub fn weight_table(&self) -> EvalResult<WeightTable> {
        WeightTable::default().with_overrides(&self.weights)
    }

    /// Reject values the evaluator cannot run with.
    pub fn validate(&self) -> EvalResult<()> {
        if self.general.concurrency == 0 {
            return Err(EvalError::InvalidConfig(
                "general.concurrency must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(EvalError::InvalidConfig(
                "model.temperature must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.model.timeout_seconds == 0 || self.agents.agent_timeout_seconds == 0 {
            return Err(EvalError::InvalidConfig(
                "timeouts must be at least 1 second".to_string(),
            ));
        }
        if self.agents.roster.is_empty() {
            return Err(EvalError::InvalidConfig(
                "agents.roster must name at least one role".to_string(),
            ));
        }
        let mut seen = self.agents.roster.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.agents.roster.len() {
            return Err(EvalError::InvalidConfig(
                "agents.roster lists a role more than once".to_string(),
            ));
        }

        self.depth_mode().validate()?;
        self.weight_table()?;
        self.clarity.validate()?;
        self.baci.validate()
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were given explicitly.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if let Some(depth) = args.depth {
            self.depth.mode = depth;
        }
        if let Some(concurrency) = args.concurrency {
            self.general.concurrency = concurrency;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
