//! Data models for the commit scorer.
//!
//! This module contains the core data structures shared by the agent loop,
//! the consensus engine and the report generator: agent roles, the eight
//! pillar metrics, agent analyses, token usage and the final report.

use crate::analysis::{AuthorScore, TeamSummary};
use crate::pipeline::CommitEvaluation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::ops::AddAssign;
use tracing::debug;

/// Perspective an agent takes when evaluating a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AgentRole {
    /// Business value and functional impact of the change
    BusinessAnalyst,
    /// The commit author's own view: effort actually spent
    DeveloperAuthor,
    /// Peer reviewer focused on code quality
    DeveloperReviewer,
    /// Architecture, complexity and technical debt
    SeniorArchitect,
    /// Test engineer focused on coverage and verification
    Sdet,
}

impl AgentRole {
    /// The default roster, in report order.
    pub const ALL: [AgentRole; 5] = [
        AgentRole::BusinessAnalyst,
        AgentRole::DeveloperAuthor,
        AgentRole::DeveloperReviewer,
        AgentRole::SeniorArchitect,
        AgentRole::Sdet,
    ];

    /// Stable identifier used in config files and reports.
    pub fn key(&self) -> &'static str {
        match self {
            AgentRole::BusinessAnalyst => "business-analyst",
            AgentRole::DeveloperAuthor => "developer-author",
            AgentRole::DeveloperReviewer => "developer-reviewer",
            AgentRole::SeniorArchitect => "senior-architect",
            AgentRole::Sdet => "sdet",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.key() == key)
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::BusinessAnalyst => write!(f, "Business Analyst"),
            AgentRole::DeveloperAuthor => write!(f, "Developer (Author)"),
            AgentRole::DeveloperReviewer => write!(f, "Developer (Reviewer)"),
            AgentRole::SeniorArchitect => write!(f, "Senior Architect"),
            AgentRole::Sdet => write!(f, "SDET"),
        }
    }
}

/// One of the eight numeric pillars scored for every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PillarMetric {
    FunctionalImpact,
    IdealTimeHours,
    TestCoverage,
    CodeQuality,
    CodeComplexity,
    ActualTimeHours,
    TechnicalDebtHours,
    DebtReductionHours,
}

impl PillarMetric {
    pub const ALL: [PillarMetric; 8] = [
        PillarMetric::FunctionalImpact,
        PillarMetric::IdealTimeHours,
        PillarMetric::TestCoverage,
        PillarMetric::CodeQuality,
        PillarMetric::CodeComplexity,
        PillarMetric::ActualTimeHours,
        PillarMetric::TechnicalDebtHours,
        PillarMetric::DebtReductionHours,
    ];

    /// Key used in agent JSON responses.
    pub fn key(&self) -> &'static str {
        match self {
            PillarMetric::FunctionalImpact => "functionalImpact",
            PillarMetric::IdealTimeHours => "idealTimeHours",
            PillarMetric::TestCoverage => "testCoverage",
            PillarMetric::CodeQuality => "codeQuality",
            PillarMetric::CodeComplexity => "codeComplexity",
            PillarMetric::ActualTimeHours => "actualTimeHours",
            PillarMetric::TechnicalDebtHours => "technicalDebtHours",
            PillarMetric::DebtReductionHours => "debtReductionHours",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|metric| metric.key() == key)
    }

    /// Hour-denominated pillars are not bounded to the 0-10 scale.
    pub fn is_hours(&self) -> bool {
        matches!(
            self,
            PillarMetric::IdealTimeHours
                | PillarMetric::ActualTimeHours
                | PillarMetric::TechnicalDebtHours
                | PillarMetric::DebtReductionHours
        )
    }

    /// Whether a raw value is acceptable for this pillar.
    pub fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.is_hours() {
            value >= 0.0
        } else {
            (0.0..=10.0).contains(&value)
        }
    }
}

impl fmt::Display for PillarMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PillarMetric::FunctionalImpact => write!(f, "Functional Impact"),
            PillarMetric::IdealTimeHours => write!(f, "Ideal Time (h)"),
            PillarMetric::TestCoverage => write!(f, "Test Coverage"),
            PillarMetric::CodeQuality => write!(f, "Code Quality"),
            PillarMetric::CodeComplexity => write!(f, "Code Complexity"),
            PillarMetric::ActualTimeHours => write!(f, "Actual Time (h)"),
            PillarMetric::TechnicalDebtHours => write!(f, "Technical Debt (h)"),
            PillarMetric::DebtReductionHours => write!(f, "Debt Reduction (h)"),
        }
    }
}

/// Read a JSON value as a number, accepting numeric strings.
pub fn json_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Fixed-shape record of the eight pillars. Missing values are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PillarMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functional_impact: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideal_time_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_coverage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_complexity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_time_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_debt_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debt_reduction_hours: Option<f64>,
}

impl PillarMetrics {
    pub fn get(&self, metric: PillarMetric) -> Option<f64> {
        match metric {
            PillarMetric::FunctionalImpact => self.functional_impact,
            PillarMetric::IdealTimeHours => self.ideal_time_hours,
            PillarMetric::TestCoverage => self.test_coverage,
            PillarMetric::CodeQuality => self.code_quality,
            PillarMetric::CodeComplexity => self.code_complexity,
            PillarMetric::ActualTimeHours => self.actual_time_hours,
            PillarMetric::TechnicalDebtHours => self.technical_debt_hours,
            PillarMetric::DebtReductionHours => self.debt_reduction_hours,
        }
    }

    pub fn set(&mut self, metric: PillarMetric, value: Option<f64>) {
        let slot = match metric {
            PillarMetric::FunctionalImpact => &mut self.functional_impact,
            PillarMetric::IdealTimeHours => &mut self.ideal_time_hours,
            PillarMetric::TestCoverage => &mut self.test_coverage,
            PillarMetric::CodeQuality => &mut self.code_quality,
            PillarMetric::CodeComplexity => &mut self.code_complexity,
            PillarMetric::ActualTimeHours => &mut self.actual_time_hours,
            PillarMetric::TechnicalDebtHours => &mut self.technical_debt_hours,
            PillarMetric::DebtReductionHours => &mut self.debt_reduction_hours,
        };
        *slot = value;
    }

    /// Number of pillars carrying a value.
    pub fn non_null_count(&self) -> usize {
        PillarMetric::ALL
            .iter()
            .filter(|m| self.get(**m).is_some())
            .count()
    }

    /// Build from an agent's `metrics` object.
    ///
    /// Unknown keys are dropped. Score pillars outside 0-10 are clamped into
    /// range; negative or non-numeric hour values are discarded.
    pub fn from_json(value: &Value) -> Self {
        let mut metrics = Self::default();
        let Some(object) = value.as_object() else {
            return metrics;
        };

        for metric in PillarMetric::ALL {
            let Some(raw) = object.get(metric.key()).and_then(json_number) else {
                continue;
            };

            let accepted = if metric.is_hours() {
                (raw >= 0.0).then_some(raw)
            } else {
                Some(raw.clamp(0.0, 10.0))
            };

            if accepted != Some(raw) {
                debug!("Adjusted {} from {} to {:?}", metric.key(), raw, accepted);
            }
            metrics.set(metric, accepted);
        }

        metrics
    }
}

/// One agent's current judgment of a commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub summary: String,
    pub details: String,
    pub metrics: PillarMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AnalysisPayload {
    /// Build from a parsed agent response object.
    pub fn from_json(value: &Value) -> Self {
        let text = |key: &str| -> String {
            match value.get(key) {
                Some(Value::String(s)) => s.trim().to_string(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        };

        Self {
            summary: text("summary"),
            details: text("details"),
            metrics: value
                .get("metrics")
                .map(PillarMetrics::from_json)
                .unwrap_or_default(),
            confidence: value
                .get("confidence")
                .and_then(json_number)
                .map(|c| c.clamp(0.0, 1.0)),
        }
    }
}

/// Token usage reported by the model provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// One agent's vote on one pillar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricContribution {
    pub role: AgentRole,
    pub metric: PillarMetric,
    pub value: Option<f64>,
    pub weight: f64,
}

/// Reconciled metrics for one commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusMetricSet {
    pub metrics: PillarMetrics,
    /// Derived score in [1, 10], present only when its inputs are.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_score: Option<f64>,
}

/// Everything the agents get to see about a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitContext {
    /// Full commit hash.
    pub hash: String,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Unified diff, possibly truncated.
    #[serde(skip_serializing, default)]
    pub diff: String,
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl CommitContext {
    /// Short (8 character) form of the hash.
    pub fn short_hash(&self) -> &str {
        let end = self.hash.len().min(8);
        &self.hash[..end]
    }

    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }
}

/// Metadata about the evaluation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Path of the evaluated repository.
    pub repository: String,
    /// Date and time of the evaluation.
    pub evaluation_date: DateTime<Utc>,
    /// Name of the LLM model used.
    pub model_used: String,
    /// Depth mode name.
    pub depth_mode: String,
    /// Number of commits evaluated.
    pub commits_evaluated: usize,
    /// Duration of the evaluation in seconds.
    pub duration_seconds: f64,
}

/// The complete evaluation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub commits: Vec<CommitEvaluation>,
    pub authors: Vec<AuthorScore>,
    pub summary: TeamSummary,
}
