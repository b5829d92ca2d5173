//! Iterative refinement loop for one agent on one commit.
//!
//! The controller drives the state machine in
//! [`crate::agent::state_machine`]: generate an analysis, score its clarity,
//! and ask the model to refine it until it is clear enough or a cap is hit.
//! The whole conversation is kept; nothing is ever pruned from history.

use crate::agent::clarity::{parse_analysis, ClarityEvaluation, ClarityEvaluator};
use crate::agent::invoker::{ChatMessage, ModelInvoker};
use crate::agent::prompts::PromptBuilder;
use crate::agent::state_machine::{
    next_state, IterationState, LoopSnapshot, PendingClarity, TerminationReason,
};
use crate::config::DepthMode;
use crate::error::{EvalError, EvalResult};
use crate::models::{AgentRole, AnalysisPayload, CommitContext, TokenUsage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mutable state of one agent's loop.
#[derive(Debug, Clone)]
pub struct AgentIterationState {
    pub role: AgentRole,
    pub state: IterationState,
    pub iteration_count: u32,
    pub max_iterations: u32,
    pub clarity_threshold: f64,
    /// Raw text of the latest model reply.
    pub current_response: Option<String>,
    /// Latest reply that parsed into an analysis.
    pub current_analysis: Option<AnalysisPayload>,
    /// Verdict on the latest reply, until a refinement consumes it.
    pub pending_clarity: Option<ClarityEvaluation>,
    pub history: Vec<ChatMessage>,
    pub token_usage: TokenUsage,
    pub termination: Option<TerminationReason>,
}

impl AgentIterationState {
    fn new(role: AgentRole, depth: &DepthMode) -> Self {
        Self {
            role,
            state: IterationState::Initial,
            iteration_count: 0,
            max_iterations: depth.max_iterations,
            clarity_threshold: depth.clarity_threshold,
            current_response: None,
            current_analysis: None,
            pending_clarity: None,
            history: Vec::new(),
            token_usage: TokenUsage::default(),
            termination: None,
        }
    }

    fn snapshot(&self) -> LoopSnapshot {
        LoopSnapshot {
            iteration_count: self.iteration_count,
            pending_clarity: self.pending_clarity.as_ref().map(|c| PendingClarity {
                score: c.score,
                has_enough_info: c.has_enough_info,
            }),
        }
    }
}

/// What an agent hands over once its loop is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome {
    pub role: AgentRole,
    /// Last parseable analysis, if the agent ever produced one.
    pub analysis: Option<AnalysisPayload>,
    #[serde(skip_serializing, default)]
    pub raw_response: String,
    pub iterations: u32,
    /// Clarity of the final response.
    pub clarity: ClarityEvaluation,
    pub termination: TerminationReason,
    /// Stopped by the hard cap; treat the analysis as low confidence.
    pub forced: bool,
    pub token_usage: TokenUsage,
}

/// Runs one agent through generate / check / refine.
pub struct IterationController {
    depth: DepthMode,
    invoker: Arc<dyn ModelInvoker>,
    prompts: Arc<dyn PromptBuilder>,
    evaluator: ClarityEvaluator,
    state: AgentIterationState,
}

impl IterationController {
    /// Fails when `depth` would let the loop run past its own cap, e.g. a
    /// zero iteration limit.
    pub fn new(
        role: AgentRole,
        depth: DepthMode,
        invoker: Arc<dyn ModelInvoker>,
        prompts: Arc<dyn PromptBuilder>,
    ) -> EvalResult<Self> {
        depth.validate()?;
        Ok(Self {
            state: AgentIterationState::new(role, &depth),
            depth,
            invoker,
            prompts,
            evaluator: ClarityEvaluator::default(),
        })
    }

    pub fn with_evaluator(mut self, evaluator: ClarityEvaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn state(&self) -> &AgentIterationState {
        &self.state
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.state.history
    }

    /// Usage accumulated so far. Still valid if `run` was cancelled.
    pub fn token_usage(&self) -> TokenUsage {
        self.state.token_usage
    }

    /// Append new turns. An empty update leaves the history untouched.
    pub fn apply_history_update(&mut self, messages: Vec<ChatMessage>) {
        if messages.is_empty() {
            debug!("{}: empty history update, keeping {} messages", self.state.role, self.state.history.len());
            return;
        }
        self.state.history.extend(messages);
    }

    async fn call_model(&mut self, transcript: &[ChatMessage]) -> EvalResult<String> {
        let response = self
            .invoker
            .invoke(transcript, self.depth.token_budget_per_agent)
            .await
            .map_err(|e| EvalError::Generation {
                role: self.state.role,
                message: format!("{:#}", e),
            })?;

        self.state.token_usage += response.usage;
        Ok(response.content)
    }

    fn record_response(&mut self, content: &str) {
        match parse_analysis(content) {
            Some(analysis) => self.state.current_analysis = Some(analysis),
            None => debug!(
                "{}: iteration {} reply is not valid JSON, keeping previous analysis",
                self.state.role, self.state.iteration_count
            ),
        }
        self.state.current_response = Some(content.to_string());
    }

    /// First generation from the commit context.
    pub async fn start(&mut self, context: &CommitContext) -> EvalResult<()> {
        let role = self.state.role;
        let system = ChatMessage::system(self.prompts.system_prompt(role));
        let user = ChatMessage::user(self.prompts.initial_prompt(role, context));
        let transcript = vec![system, user];

        let content = self.call_model(&transcript).await?;

        let mut update = transcript;
        update.push(ChatMessage::assistant(content.clone()));
        self.apply_history_update(update);

        self.state.iteration_count = 1;
        self.record_response(&content);
        debug!("{}: initial analysis generated", role);
        Ok(())
    }

    /// Score the latest reply.
    pub fn check_clarity(&mut self) -> &ClarityEvaluation {
        let text = self.state.current_response.as_deref().unwrap_or("");
        let evaluation = self.evaluator.evaluate(text, self.state.clarity_threshold);
        debug!(
            "{}: clarity {:.2} after iteration {} ({} questions)",
            self.state.role,
            evaluation.score,
            self.state.iteration_count,
            evaluation.self_questions.len()
        );
        self.state.pending_clarity.insert(evaluation)
    }

    /// Ask for a revised analysis, continuing the full conversation.
    pub async fn refine(
        &mut self,
        context: &CommitContext,
        self_questions: &[String],
        clarity_score: f64,
    ) -> EvalResult<()> {
        let role = self.state.role;
        let prior = self.state.current_response.clone().unwrap_or_default();
        let user = ChatMessage::user(self.prompts.refinement_prompt(
            role,
            context,
            &prior,
            self_questions,
            clarity_score,
        ));

        let mut transcript = self.state.history.clone();
        transcript.push(user.clone());
        let content = self.call_model(&transcript).await?;

        self.apply_history_update(vec![user, ChatMessage::assistant(content.clone())]);
        self.state.iteration_count += 1;
        self.record_response(&content);
        debug!("{}: refinement {} generated", role, self.state.iteration_count);
        Ok(())
    }

    /// Drive the loop to a terminal state.
    pub async fn run(&mut self, context: &CommitContext) -> EvalResult<AgentOutcome> {
        while !self.state.state.is_terminal() {
            match self.state.state {
                IterationState::Initial => self.start(context).await?,
                IterationState::ClarityCheck => {
                    self.check_clarity();
                }
                IterationState::Refining => {
                    let Some(pending) = self.state.pending_clarity.take() else {
                        self.state.state = IterationState::ClarityCheck;
                        continue;
                    };
                    self.refine(context, &pending.self_questions, pending.score)
                        .await?;
                }
                IterationState::Terminated => break,
            }

            let snapshot = self.state.snapshot();
            let transition = next_state(&snapshot, &self.depth);
            debug!(
                "{}: {} -> {} (iteration {}, clarity {:?})",
                self.state.role,
                self.state.state,
                transition.next,
                snapshot.iteration_count,
                snapshot.pending_clarity.map(|c| c.score)
            );

            if let Some(reason) = transition.reason {
                self.state.termination = Some(reason);
                if reason == TerminationReason::ForcedStop {
                    warn!(
                        "{}: forced stop after {} iterations (limit {})",
                        self.state.role, self.state.iteration_count, self.state.max_iterations
                    );
                }
            }
            self.state.state = transition.next;
        }

        Ok(self.finish())
    }

    fn finish(&self) -> AgentOutcome {
        let raw_response = self.state.current_response.clone().unwrap_or_default();
        let clarity = self
            .evaluator
            .evaluate(&raw_response, self.state.clarity_threshold);
        let termination = self
            .state
            .termination
            .unwrap_or(TerminationReason::MaxIterations);

        if clarity.is_malformed() {
            warn!("{}: final response is not valid JSON", self.state.role);
        }
        info!(
            "{} finished: {} iteration(s), clarity {:.2}, {}",
            self.state.role, self.state.iteration_count, clarity.score, termination
        );
        debug!("{}: transcript holds {} messages", self.state.role, self.history().len());

        AgentOutcome {
            role: self.state.role,
            analysis: self.state.current_analysis.clone(),
            raw_response,
            iterations: self.state.iteration_count,
            clarity,
            termination,
            forced: termination == TerminationReason::ForcedStop,
            token_usage: self.state.token_usage,
        }
    }
}
