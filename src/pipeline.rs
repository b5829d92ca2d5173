//! Commit evaluation pipeline.
//!
//! Every role in the roster runs its own [`IterationController`] as a tokio
//! task. Once all of them have finished, failed or timed out, the surviving
//! analyses are reconciled by the [`ConsensusAggregator`].

use crate::agent::{AgentOutcome, ClarityEvaluator, IterationController, ModelInvoker, PromptBuilder};
use crate::analysis::{ConsensusAggregator, ConsensusOutcome};
use crate::config::{Config, DepthMode};
use crate::error::{EvalError, EvalResult};
use crate::models::{AgentRole, CommitContext, TokenUsage};
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A role that produced no outcome for a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedRole {
    pub role: AgentRole,
    pub error: String,
    /// Tokens spent before the failure.
    pub token_usage: TokenUsage,
}

/// Everything known about one evaluated commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitEvaluation {
    pub commit: CommitContext,
    pub consensus: ConsensusOutcome,
    /// Outcomes in roster order.
    pub agents: Vec<AgentOutcome>,
    pub failed_roles: Vec<FailedRole>,
    /// Usage of finished and failed agents together.
    pub token_usage: TokenUsage,
}

impl CommitEvaluation {
    pub fn commit_score(&self) -> Option<f64> {
        self.consensus.consensus.commit_score
    }

    /// Agents that were stopped by the hard iteration cap.
    pub fn forced_agents(&self) -> impl Iterator<Item = &AgentOutcome> {
        self.agents.iter().filter(|a| a.forced)
    }
}

enum RoleResult {
    Finished(AgentOutcome),
    Failed(FailedRole),
}

/// Runs the roster against commits.
pub struct CommitEvaluator {
    roster: Vec<AgentRole>,
    depth: DepthMode,
    agent_timeout: Duration,
    invoker: Arc<dyn ModelInvoker>,
    prompts: Arc<dyn PromptBuilder>,
    aggregator: ConsensusAggregator,
    clarity: ClarityEvaluator,
}

impl CommitEvaluator {
    pub fn new(
        roster: Vec<AgentRole>,
        depth: DepthMode,
        agent_timeout: Duration,
        invoker: Arc<dyn ModelInvoker>,
        prompts: Arc<dyn PromptBuilder>,
        aggregator: ConsensusAggregator,
    ) -> Self {
        Self {
            roster,
            depth,
            agent_timeout,
            invoker,
            prompts,
            aggregator,
            clarity: ClarityEvaluator::default(),
        }
    }

    pub fn with_clarity(mut self, clarity: ClarityEvaluator) -> Self {
        self.clarity = clarity;
        self
    }

    /// Build an evaluator from a validated configuration.
    pub fn from_config(
        config: &Config,
        invoker: Arc<dyn ModelInvoker>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> EvalResult<Self> {
        Ok(Self::new(
            config.agents.roster.clone(),
            config.depth_mode(),
            Duration::from_secs(config.agents.agent_timeout_seconds),
            invoker,
            prompts,
            ConsensusAggregator::new(config.weight_table()?),
        )
        .with_clarity(ClarityEvaluator::new(config.clarity)))
    }

    /// Evaluate one commit with every role in the roster.
    pub async fn evaluate_commit(&self, commit: CommitContext) -> CommitEvaluation {
        let context = Arc::new(commit);
        let mut tasks = JoinSet::new();

        for &role in &self.roster {
            let context = Arc::clone(&context);
            let invoker = Arc::clone(&self.invoker);
            let prompts = Arc::clone(&self.prompts);
            let depth = self.depth;
            let limit = self.agent_timeout;
            let clarity = self.clarity;

            tasks.spawn(async move {
                let mut controller = match IterationController::new(role, depth, invoker, prompts) {
                    Ok(controller) => controller.with_evaluator(clarity),
                    Err(e) => {
                        return RoleResult::Failed(FailedRole {
                            role,
                            error: e.to_string(),
                            token_usage: TokenUsage::default(),
                        })
                    }
                };
                let result = tokio::time::timeout(limit, controller.run(&context)).await;
                let token_usage = controller.token_usage();

                let failure = match result {
                    Ok(Ok(outcome)) => return RoleResult::Finished(outcome),
                    Ok(Err(e)) => e,
                    Err(_) => EvalError::AgentTimeout {
                        role,
                        seconds: limit.as_secs(),
                    },
                };

                warn!(
                    "{} failed on {} after {} iteration(s): {}",
                    role,
                    context.short_hash(),
                    controller.state().iteration_count,
                    failure
                );
                RoleResult::Failed(FailedRole {
                    role,
                    error: failure.to_string(),
                    token_usage,
                })
            });
        }

        let mut agents = Vec::with_capacity(self.roster.len());
        let mut failed_roles = Vec::new();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(RoleResult::Finished(outcome)) => agents.push(outcome),
                Ok(RoleResult::Failed(failed)) => failed_roles.push(failed),
                Err(e) => error!("Agent task panicked on {}: {}", context.short_hash(), e),
            }
        }

        // A panicked task returns no role, so account for it by elimination.
        for &role in &self.roster {
            let reported = agents.iter().any(|a| a.role == role)
                || failed_roles.iter().any(|f| f.role == role);
            if !reported {
                failed_roles.push(FailedRole {
                    role,
                    error: "agent task panicked".to_string(),
                    token_usage: TokenUsage::default(),
                });
            }
        }

        let roster_index = |role: AgentRole| self.roster.iter().position(|r| *r == role);
        agents.sort_by_key(|a| roster_index(a.role));
        failed_roles.sort_by_key(|f| roster_index(f.role));

        let consensus = self.aggregator.aggregate(
            agents
                .iter()
                .filter_map(|a| a.analysis.as_ref().map(|analysis| (a.role, &analysis.metrics))),
        );

        let mut token_usage = TokenUsage::default();
        for usage in agents
            .iter()
            .map(|a| a.token_usage)
            .chain(failed_roles.iter().map(|f| f.token_usage))
        {
            token_usage += usage;
        }

        let commit = Arc::try_unwrap(context).unwrap_or_else(|shared| (*shared).clone());

        debug!(
            "{}: {} agents finished, {} failed, {} pillars agreed, score {:?}",
            commit.short_hash(),
            agents.len(),
            failed_roles.len(),
            consensus.consensus.metrics.non_null_count(),
            consensus.consensus.commit_score
        );

        CommitEvaluation {
            commit,
            consensus,
            agents,
            failed_roles,
            token_usage,
        }
    }

    /// Evaluate commits with at most `concurrency` in flight.
    ///
    /// Results come back in input order.
    pub async fn evaluate_commits(
        &self,
        commits: Vec<CommitContext>,
        concurrency: usize,
        show_progress: bool,
    ) -> Vec<CommitEvaluation> {
        let total = commits.len();
        info!(
            "Evaluating {} commits with {} agents each ({} at a time)",
            total,
            self.roster.len(),
            concurrency
        );

        let progress = if show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let mut results: Vec<(usize, CommitEvaluation)> = stream::iter(commits.into_iter().enumerate())
            .map(|(index, commit)| {
                let progress = progress.as_ref();
                async move {
                    let evaluation = self.evaluate_commit(commit).await;
                    if let Some(pb) = progress {
                        pb.set_message(evaluation.commit.short_hash().to_string());
                        pb.inc(1);
                    }
                    (index, evaluation)
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        if let Some(pb) = progress {
            pb.finish_with_message("done");
        }

        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, evaluation)| evaluation).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::invoker::fakes::ScriptedInvoker;
    use crate::agent::RolePromptBuilder;
    use crate::config::WeightTable;
    use crate::models::PillarMetric;
    use chrono::Utc;

    fn reply(quality: f64) -> String {
        serde_json::json!({
            "summary": "Adds capped exponential backoff to the HTTP client, quality 8/10; minor risk in the retry loop.",
            "details": "The change wraps request dispatch in src/http/client.rs with a retry loop of up to 3 attempts. Because the backoff is capped, the function cannot stall callers indefinitely. Code quality is scored well since error handling is explicit; complexity is rated 4 as the loop adds one branch. The ideal time estimate is 3 hours versus 4 actual hours.",
            "metrics": {
                "functionalImpact": 6, "idealTimeHours": 3, "testCoverage": 5, "codeQuality": quality,
                "codeComplexity": 4, "actualTimeHours": 4, "technicalDebtHours": 0.5, "debtReductionHours": 1
            },
            "confidence": 0.8
        })
        .to_string()
    }

    fn commit(hash: &str) -> CommitContext {
        CommitContext {
            hash: hash.to_string(),
            author_name: "Sam".to_string(),
            author_email: "sam@example.com".to_string(),
            message: "Add backoff".to_string(),
            timestamp: Utc::now(),
            diff: "+backoff".to_string(),
            files_changed: 1,
            insertions: 1,
            deletions: 0,
        }
    }

    fn depth() -> DepthMode {
        DepthMode {
            max_iterations: 2,
            clarity_threshold: 0.8,
            skip_self_refinement: false,
            token_budget_per_agent: 1024,
        }
    }

    fn evaluator(invoker: Arc<dyn ModelInvoker>, roster: Vec<AgentRole>) -> CommitEvaluator {
        CommitEvaluator::new(
            roster,
            depth(),
            Duration::from_secs(5),
            invoker,
            Arc::new(RolePromptBuilder),
            ConsensusAggregator::new(WeightTable::default()),
        )
    }

    #[tokio::test]
    async fn test_full_roster_reaches_consensus() {
        let invoker = Arc::new(ScriptedInvoker::new([reply(8.0)]));
        let evaluator = evaluator(invoker, AgentRole::ALL.to_vec());

        let evaluation = evaluator.evaluate_commit(commit("aaaa1111")).await;

        assert_eq!(evaluation.agents.len(), 5);
        assert!(evaluation.failed_roles.is_empty());
        let roles: Vec<_> = evaluation.agents.iter().map(|a| a.role).collect();
        assert_eq!(roles, AgentRole::ALL.to_vec());
        assert_eq!(
            evaluation.consensus.consensus.metrics.get(PillarMetric::CodeQuality),
            Some(8.0)
        );
        assert!(evaluation.commit_score().is_some());
        assert_eq!(evaluation.token_usage, TokenUsage::new(500, 250));
        assert_eq!(evaluation.consensus.contributions.len(), 5 * 8);
    }

    #[tokio::test]
    async fn test_failed_roles_are_recorded() {
        let invoker = Arc::new(ScriptedInvoker::failing("model not found"));
        let evaluator = evaluator(invoker, vec![AgentRole::Sdet, AgentRole::BusinessAnalyst]);

        let evaluation = evaluator.evaluate_commit(commit("bbbb2222")).await;

        assert!(evaluation.agents.is_empty());
        assert_eq!(evaluation.failed_roles.len(), 2);
        assert_eq!(evaluation.failed_roles[0].role, AgentRole::Sdet);
        assert!(evaluation.failed_roles[0].error.contains("model not found"));
        assert!(evaluation.commit_score().is_none());
        assert_eq!(evaluation.consensus.consensus.metrics.non_null_count(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_role_keeps_partial_usage() {
        let invoker = Arc::new(
            ScriptedInvoker::new(["{\"summary\":\"ok\",\"details\":\"\",\"metrics\":{},\"confidence\":0.5}"])
                .with_delay(Duration::from_secs(30), 1),
        );
        let evaluator = CommitEvaluator::new(
            vec![AgentRole::SeniorArchitect],
            depth(),
            Duration::from_millis(200),
            invoker,
            Arc::new(RolePromptBuilder),
            ConsensusAggregator::default(),
        );

        let evaluation = evaluator.evaluate_commit(commit("cccc3333")).await;

        assert_eq!(evaluation.failed_roles.len(), 1);
        let failed = &evaluation.failed_roles[0];
        assert!(failed.error.contains("timed out"));
        assert_eq!(failed.token_usage, TokenUsage::new(100, 50));
        assert_eq!(evaluation.token_usage, TokenUsage::new(100, 50));
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let invoker = Arc::new(ScriptedInvoker::new([reply(7.0)]));
        let evaluator = evaluator(invoker, vec![AgentRole::DeveloperReviewer]);

        let commits = vec![commit("11111111"), commit("22222222"), commit("33333333")];
        let evaluations = evaluator.evaluate_commits(commits, 2, false).await;

        let hashes: Vec<_> = evaluations.iter().map(|e| e.commit.hash.as_str()).collect();
        assert_eq!(hashes, vec!["11111111", "22222222", "33333333"]);
    }

    struct PanickingPrompts(AgentRole);

    impl PromptBuilder for PanickingPrompts {
        fn system_prompt(&self, role: AgentRole) -> String {
            if role == self.0 {
                panic!("prompt template missing for {role}");
            }
            RolePromptBuilder.system_prompt(role)
        }

        fn initial_prompt(&self, role: AgentRole, context: &CommitContext) -> String {
            RolePromptBuilder.initial_prompt(role, context)
        }

        fn refinement_prompt(
            &self,
            role: AgentRole,
            context: &CommitContext,
            prior_response: &str,
            self_questions: &[String],
            clarity_score: f64,
        ) -> String {
            RolePromptBuilder.refinement_prompt(role, context, prior_response, self_questions, clarity_score)
        }
    }

    #[tokio::test]
    async fn test_panicked_role_is_recorded_as_failed() {
        let invoker = Arc::new(ScriptedInvoker::new([reply(8.0)]));
        let evaluator = CommitEvaluator::new(
            vec![AgentRole::DeveloperReviewer, AgentRole::Sdet],
            depth(),
            Duration::from_secs(5),
            invoker,
            Arc::new(PanickingPrompts(AgentRole::Sdet)),
            ConsensusAggregator::default(),
        );

        let evaluation = evaluator.evaluate_commit(commit("eeee5555")).await;

        assert_eq!(evaluation.agents.len(), 1);
        assert_eq!(evaluation.agents[0].role, AgentRole::DeveloperReviewer);
        assert_eq!(evaluation.failed_roles.len(), 1);
        assert_eq!(evaluation.failed_roles[0].role, AgentRole::Sdet);
        assert!(evaluation.failed_roles[0].error.contains("panicked"));
    }

    #[tokio::test]
    async fn test_invalid_depth_fails_every_role() {
        let invoker = Arc::new(ScriptedInvoker::new([reply(8.0)]));
        let evaluator = CommitEvaluator::new(
            vec![AgentRole::Sdet],
            DepthMode { max_iterations: 0, ..depth() },
            Duration::from_secs(5),
            invoker.clone(),
            Arc::new(RolePromptBuilder),
            ConsensusAggregator::default(),
        );

        let evaluation = evaluator.evaluate_commit(commit("ffff6666")).await;

        assert!(evaluation.agents.is_empty());
        assert_eq!(evaluation.failed_roles.len(), 1);
        assert!(evaluation.failed_roles[0].error.contains("max_iterations"));
        assert!(invoker.calls().is_empty());
    }

    #[test]
    fn test_evaluator_from_config() {
        let config = Config::default();
        let invoker = Arc::new(ScriptedInvoker::new([reply(6.0)]));
        let evaluator =
            CommitEvaluator::from_config(&config, invoker, Arc::new(RolePromptBuilder)).unwrap();
        assert_eq!(evaluator.roster.len(), 5);
        assert_eq!(evaluator.agent_timeout, Duration::from_secs(900));
    }
}
