//! Author aggregation and team statistics.
//!
//! Groups commit evaluations by author, turns each author into a BACI data
//! point and computes the summary numbers shown at the top of a report.

use crate::analysis::baci::{compute_baci, BaciConfig, BaciDataPoint};
use crate::error::EvalResult;
use crate::models::TokenUsage;
use crate::pipeline::CommitEvaluation;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized score of one author.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorScore {
    pub author_email: String,
    pub author_name: String,
    /// Commits evaluated for this author.
    pub commits: u32,
    /// Commits that produced a commit score.
    pub scored_commits: u32,
    /// Mean commit score, or the prior when no commit was scored.
    pub base_quality: f64,
    /// Team-normalized score in [1, 10).
    pub score: f64,
    pub shrunk_quality: f64,
    pub volume_multiplier: f64,
}

/// Headline numbers for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub commits_evaluated: usize,
    pub commits_scored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean_commit_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lowest_commit_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highest_commit_score: Option<f64>,
    pub authors: usize,
    pub failed_agents: usize,
    pub forced_agents: usize,
    pub token_usage: TokenUsage,
}

impl TeamSummary {
    pub fn from_evaluations(evaluations: &[CommitEvaluation], authors: &[AuthorScore]) -> Self {
        let scores: Vec<f64> = evaluations.iter().filter_map(|e| e.commit_score()).collect();

        let mut token_usage = TokenUsage::default();
        for evaluation in evaluations {
            token_usage += evaluation.token_usage;
        }

        Self {
            commits_evaluated: evaluations.len(),
            commits_scored: scores.len(),
            mean_commit_score: mean(&scores),
            lowest_commit_score: scores.iter().copied().reduce(f64::min),
            highest_commit_score: scores.iter().copied().reduce(f64::max),
            authors: authors.len(),
            failed_agents: evaluations.iter().map(|e| e.failed_roles.len()).sum(),
            forced_agents: evaluations.iter().map(|e| e.forced_agents().count()).sum(),
            token_usage,
        }
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Identity of an author across commits.
fn author_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Group evaluations by author email.
pub fn group_by_author(evaluations: &[CommitEvaluation]) -> BTreeMap<String, Vec<&CommitEvaluation>> {
    let mut grouped: BTreeMap<String, Vec<&CommitEvaluation>> = BTreeMap::new();

    for evaluation in evaluations {
        grouped
            .entry(author_key(&evaluation.commit.author_email))
            .or_default()
            .push(evaluation);
    }

    // Oldest first within each author
    for commits in grouped.values_mut() {
        commits.sort_by_key(|e| e.commit.timestamp);
    }

    grouped
}

/// One BACI data point per author, in email order.
pub fn author_cohort(evaluations: &[CommitEvaluation], quality_prior: f64) -> Vec<BaciDataPoint> {
    group_by_author(evaluations)
        .into_iter()
        .map(|(email, commits)| {
            let scores: Vec<f64> = commits.iter().filter_map(|e| e.commit_score()).collect();
            BaciDataPoint::new(
                email,
                u32::try_from(commits.len()).unwrap_or(u32::MAX),
                mean(&scores).unwrap_or(quality_prior),
            )
        })
        .collect()
}

/// Score every author against the rest of the team, best first.
pub fn build_author_scores(
    evaluations: &[CommitEvaluation],
    config: &BaciConfig,
) -> EvalResult<Vec<AuthorScore>> {
    let grouped = group_by_author(evaluations);
    let cohort = author_cohort(evaluations, config.quality_prior);
    let results = compute_baci(&cohort, config)?;

    let mut authors: Vec<AuthorScore> = cohort
        .iter()
        .zip(results)
        .map(|(point, result)| {
            let commits = grouped.get(&point.author_id).map(Vec::as_slice).unwrap_or(&[]);
            // Most recent name wins
            let author_name = commits
                .last()
                .map(|e| e.commit.author_name.clone())
                .unwrap_or_default();

            AuthorScore {
                author_email: point.author_id.clone(),
                author_name,
                commits: point.commits,
                scored_commits: commits.iter().filter(|e| e.commit_score().is_some()).count() as u32,
                base_quality: point.base_quality_score,
                score: result.score,
                shrunk_quality: result.shrunk_quality,
                volume_multiplier: result.volume_multiplier,
            }
        })
        .collect();

    authors.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.author_email.cmp(&b.author_email))
    });

    Ok(authors)
}

/// Commits whose score is below `threshold`.
pub fn commits_below(evaluations: &[CommitEvaluation], threshold: f64) -> Vec<&CommitEvaluation> {
    evaluations
        .iter()
        .filter(|e| e.commit_score().is_some_and(|s| s < threshold))
        .collect()
}
