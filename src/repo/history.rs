//! Git history reading.
//!
//! Opens a local repository with git2 and turns commits into the
//! [`CommitContext`] records the agents are prompted with.

use crate::models::CommitContext;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use git2::{Commit, DiffFormat, Oid, Repository, Sort};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{debug, info};

const TRUNCATION_MARKER: &str = "\n... [diff truncated]\n";

/// Which commits to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitSelection {
    /// Explicit revisions, in the given order.
    Revisions(Vec<String>),
    /// The most recent non-merge commits reachable from a branch (or HEAD).
    Recent { branch: Option<String>, limit: usize },
}

/// Open an existing local repository.
pub fn open_repository(path: &Path) -> Result<Repository> {
    info!("Opening repository: {}", path.display());

    if !path.exists() {
        anyhow::bail!("Repository path does not exist: {}", path.display());
    }

    Repository::discover(path)
        .with_context(|| format!("Failed to open repository: {}", path.display()))
}

/// Ids of the most recent non-merge commits, newest first.
pub fn recent_commits(repo: &Repository, branch: Option<&str>, limit: usize) -> Result<Vec<Oid>> {
    let mut walk = repo.revwalk().context("Failed to walk history")?;
    walk.set_sorting(Sort::TIME)?;

    match branch {
        Some(name) => {
            let start = repo
                .revparse_single(name)
                .with_context(|| format!("Unknown branch or revision: {}", name))?
                .peel_to_commit()?;
            walk.push(start.id())?;
        }
        None => walk.push_head().context("Repository has no HEAD commit")?,
    }

    let mut ids = Vec::with_capacity(limit);
    for oid in walk {
        if ids.len() >= limit {
            break;
        }
        let oid = oid?;
        let commit = repo.find_commit(oid)?;
        if commit.parent_count() > 1 {
            debug!("Skipping merge commit {}", oid);
            continue;
        }
        ids.push(oid);
    }

    Ok(ids)
}

/// Resolve a revision and read it.
pub fn load_commit(repo: &Repository, revision: &str, max_diff_chars: usize) -> Result<CommitContext> {
    let commit = repo
        .revparse_single(revision)
        .with_context(|| format!("Unknown revision: {}", revision))?
        .peel_to_commit()
        .with_context(|| format!("Revision is not a commit: {}", revision))?;

    commit_context(repo, &commit, max_diff_chars)
}

/// Read every selected commit, showing progress when asked.
pub fn collect_commits(
    repo: &Repository,
    selection: &CommitSelection,
    max_diff_chars: usize,
    show_progress: bool,
) -> Result<Vec<CommitContext>> {
    let revisions: Vec<String> = match selection {
        CommitSelection::Revisions(revs) => revs.clone(),
        CommitSelection::Recent { branch, limit } => {
            recent_commits(repo, branch.as_deref(), *limit)?
                .into_iter()
                .map(|oid| oid.to_string())
                .collect()
        }
    };

    let progress_bar = if show_progress && revisions.len() > 1 {
        let pb = ProgressBar::new(revisions.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} Reading commits [{bar:40.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    let mut commits = Vec::with_capacity(revisions.len());
    for revision in &revisions {
        commits.push(load_commit(repo, revision, max_diff_chars)?);
        if let Some(ref pb) = progress_bar {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    info!("Loaded {} commits", commits.len());
    Ok(commits)
}

fn commit_context(repo: &Repository, commit: &Commit<'_>, max_diff_chars: usize) -> Result<CommitContext> {
    let tree = commit.tree()?;
    let parent_tree = if commit.parent_count() > 0 {
        Some(commit.parent(0)?.tree()?)
    } else {
        None
    };

    let diff = repo
        .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), None)
        .with_context(|| format!("Failed to diff commit {}", commit.id()))?;
    let stats = diff.stats()?;

    let mut patch = String::new();
    diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if matches!(line.origin(), '+' | '-' | ' ') {
            patch.push(line.origin());
        }
        patch.push_str(&String::from_utf8_lossy(line.content()));
        true
    })?;

    let author = commit.author();
    Ok(CommitContext {
        hash: commit.id().to_string(),
        author_name: author.name().unwrap_or("unknown").to_string(),
        author_email: author.email().unwrap_or("unknown").to_string(),
        message: commit.message().unwrap_or("").to_string(),
        timestamp: DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_default(),
        diff: truncate_diff(patch, max_diff_chars),
        files_changed: stats.files_changed(),
        insertions: stats.insertions(),
        deletions: stats.deletions(),
    })
}

/// Cut a diff to at most `max_chars` characters, marking the cut.
fn truncate_diff(diff: String, max_chars: usize) -> String {
    match diff.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            let mut truncated = diff[..byte_index].to_string();
            truncated.push_str(TRUNCATION_MARKER);
            truncated
        }
        None => diff,
    }
}
