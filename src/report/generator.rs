//! Markdown and JSON report generation.
//!
//! This module renders a finished evaluation run: team summary, the author
//! leaderboard and one section per commit with its consensus, the votes
//! behind it and how each agent's loop ended.

use crate::analysis::{AuthorScore, TeamSummary};
use crate::models::{PillarMetric, Report, ReportMetadata};
use crate::pipeline::CommitEvaluation;
use anyhow::Result;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &Report) -> String {
    let mut output = String::new();

    output.push_str("# YoScorer Report\n\n");
    output.push_str(&generate_metadata_section(&report.metadata));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_authors_section(&report.authors));
    output.push_str(&generate_commits_section(&report.commits));
    output.push_str(&generate_footer());

    output
}

fn format_score(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

fn format_metric(metric: PillarMetric, value: Option<f64>) -> String {
    match value {
        Some(v) if metric.is_hours() => format!("{:.2}h", v),
        Some(v) => format!("{:.1}", v),
        None => "-".to_string(),
    }
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Repository:** {}\n", metadata.repository));
    section.push_str(&format!(
        "- **Evaluation Date:** {}\n",
        metadata.evaluation_date.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!("- **Depth:** {}\n", metadata.depth_mode));
    section.push_str(&format!(
        "- **Commits Evaluated:** {}\n",
        metadata.commits_evaluated
    ));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n\n",
        metadata.duration_seconds
    ));

    section
}

/// Generate the team summary section.
fn generate_summary_section(summary: &TeamSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Commits | Scored | Mean Score | Lowest | Highest | Authors |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} | {} |\n\n",
        summary.commits_evaluated,
        summary.commits_scored,
        format_score(summary.mean_commit_score),
        format_score(summary.lowest_commit_score),
        format_score(summary.highest_commit_score),
        summary.authors
    ));

    section.push_str(&format!(
        "**Tokens:** {} in / {} out ({} total)\n\n",
        summary.token_usage.input_tokens,
        summary.token_usage.output_tokens,
        summary.token_usage.total()
    ));

    if summary.failed_agents > 0 {
        section.push_str(&format!(
            "> ⚠️ {} agent run(s) failed; their votes are missing from consensus.\n\n",
            summary.failed_agents
        ));
    }
    if summary.forced_agents > 0 {
        section.push_str(&format!(
            "> ⚠️ {} agent run(s) hit the hard iteration cap; treat them as low confidence.\n\n",
            summary.forced_agents
        ));
    }

    section
}

/// Generate the author leaderboard.
fn generate_authors_section(authors: &[AuthorScore]) -> String {
    if authors.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Authors\n\n");
    section.push_str("| # | Author | Commits | Base Quality | Shrunk | Volume | Score |\n");
    section.push_str("|:---:|:---|:---:|:---:|:---:|:---:|:---:|\n");

    for (i, author) in authors.iter().enumerate() {
        section.push_str(&format!(
            "| {} | {} <{}> | {} ({} scored) | {:.2} | {:.2} | {:.3} | **{:.2}** |\n",
            i + 1,
            author.author_name,
            author.author_email,
            author.commits,
            author.scored_commits,
            author.base_quality,
            author.shrunk_quality,
            author.volume_multiplier,
            author.score
        ));
    }
    section.push('\n');

    section
}

/// Generate the per-commit sections.
fn generate_commits_section(commits: &[CommitEvaluation]) -> String {
    let mut section = String::new();

    section.push_str("## Commits\n\n");

    if commits.is_empty() {
        section.push_str("No commits were evaluated.\n\n");
        return section;
    }

    for evaluation in commits {
        section.push_str(&generate_commit_block(evaluation));
    }

    section
}

/// Generate the block for a single commit.
fn generate_commit_block(evaluation: &CommitEvaluation) -> String {
    let mut block = String::new();
    let commit = &evaluation.commit;

    block.push_str(&format!(
        "### `{}` {}\n\n",
        commit.short_hash(),
        commit.subject()
    ));
    block.push_str(&format!(
        "*{} <{}> | {} | {} files (+{} / -{})*\n\n",
        commit.author_name,
        commit.author_email,
        commit.timestamp.format("%Y-%m-%d"),
        commit.files_changed,
        commit.insertions,
        commit.deletions
    ));
    block.push_str(&format!(
        "**Commit Score:** {}\n\n",
        format_score(evaluation.commit_score())
    ));

    // Consensus table with one column per agent
    let roles: Vec<_> = evaluation.agents.iter().map(|a| a.role).collect();
    block.push_str("| Pillar | Consensus |");
    for role in &roles {
        block.push_str(&format!(" {} |", role));
    }
    block.push_str("\n|:---|:---:|");
    block.push_str(&":---:|".repeat(roles.len()));
    block.push('\n');

    let consensus = &evaluation.consensus;
    for metric in PillarMetric::ALL {
        block.push_str(&format!(
            "| {} | **{}** |",
            metric,
            format_metric(metric, consensus.consensus.metrics.get(metric))
        ));
        for role in &roles {
            let vote = consensus
                .contributions_for(metric)
                .find(|c| c.role == *role)
                .and_then(|c| c.value);
            block.push_str(&format!(" {} |", format_metric(metric, vote)));
        }
        block.push('\n');
    }
    block.push('\n');

    if !evaluation.agents.is_empty() {
        block.push_str("| Agent | Iterations | Clarity | Stopped By | Tokens |\n");
        block.push_str("|:---|:---:|:---:|:---|:---:|\n");
        for agent in &evaluation.agents {
            let stopped = if agent.forced {
                format!("⚠️ {}", agent.termination)
            } else {
                agent.termination.to_string()
            };
            block.push_str(&format!(
                "| {} | {} | {:.2} | {} | {} |\n",
                agent.role,
                agent.iterations,
                agent.clarity.score,
                stopped,
                agent.token_usage.total()
            ));
        }
        block.push('\n');

        for agent in &evaluation.agents {
            if let Some(ref analysis) = agent.analysis {
                if !analysis.summary.is_empty() {
                    block.push_str(&format!("> **{}:** {}\n>\n", agent.role, analysis.summary));
                }
            }
        }
        block.push('\n');
    }

    for failed in &evaluation.failed_roles {
        block.push_str(&format!(
            "> ❌ **{} failed:** {} ({} tokens spent)\n\n",
            failed.role,
            failed.error,
            failed.token_usage.total()
        ));
    }

    block.push_str("---\n\n");

    block
}

/// Generate the report footer.
fn generate_footer() -> String {
    "*Report generated by YoScorer*\n".to_string()
}

/// Generate a JSON report.
pub fn generate_json_report(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}
