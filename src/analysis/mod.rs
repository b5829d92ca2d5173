//! Cross-agent and cross-author analysis.
//!
//! Consensus reconciles the agents of one commit; BACI normalizes authors
//! against their team.

pub mod aggregator;
pub mod baci;
pub mod consensus;

pub use aggregator::{build_author_scores, commits_below, AuthorScore, TeamSummary};
pub use baci::BaciConfig;
pub use consensus::{ConsensusAggregator, ConsensusOutcome};
