//! Prompt construction for the evaluation agents.
//!
//! The controller never looks inside prompts; it only appends whatever a
//! [`PromptBuilder`] returns to the transcript.

use crate::models::{AgentRole, CommitContext, PillarMetric};

/// Builds the three kinds of prompts an agent needs.
pub trait PromptBuilder: Send + Sync {
    fn system_prompt(&self, role: AgentRole) -> String;

    fn initial_prompt(&self, role: AgentRole, context: &CommitContext) -> String;

    fn refinement_prompt(
        &self,
        role: AgentRole,
        context: &CommitContext,
        prior_response: &str,
        self_questions: &[String],
        clarity_score: f64,
    ) -> String;
}

/// Default prompts: one focus per role plus a shared JSON contract.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePromptBuilder;

fn role_focus(role: AgentRole) -> &'static str {
    match role {
        AgentRole::BusinessAnalyst => {
            "You are a business analyst. Judge the functional impact of the change for users and \
             the business, and estimate how many hours an experienced developer would ideally need \
             for it (idealTimeHours)."
        }
        AgentRole::DeveloperAuthor => {
            "You are the author of this commit. Explain what you changed and why, and estimate how \
             many hours the work actually took (actualTimeHours)."
        }
        AgentRole::DeveloperReviewer => {
            "You are a senior peer reviewer. Judge readability, correctness, error handling and \
             maintainability; your codeQuality score carries the most weight."
        }
        AgentRole::SeniorArchitect => {
            "You are a senior software architect. Judge design, coupling and complexity \
             (codeComplexity), and estimate technical debt introduced (technicalDebtHours) and \
             removed (debtReductionHours)."
        }
        AgentRole::Sdet => {
            "You are a software development engineer in test. Judge how well the change is \
             covered by tests (testCoverage) and what verification is missing."
        }
    }
}

fn response_contract() -> String {
    let keys: Vec<String> = PillarMetric::ALL
        .iter()
        .map(|m| {
            let scale = if m.is_hours() { "hours >= 0" } else { "0-10" };
            format!("    \"{}\": <number, {}>", m.key(), scale)
        })
        .collect();

    format!(
        "Respond with exactly one JSON object and nothing else:\n\
         {{\n  \"summary\": \"<one or two specific sentences>\",\n  \
         \"details\": \"<technical analysis that justifies every metric>\",\n  \
         \"metrics\": {{\n{}\n  }},\n  \"confidence\": <number 0-1>\n}}\n\
         Score every metric. Use null only when the diff gives no basis at all.",
        keys.join(",\n")
    )
}

impl PromptBuilder for RolePromptBuilder {
    fn system_prompt(&self, role: AgentRole) -> String {
        format!(
            "{}\n\nYou are one of several reviewers scoring the same commit independently.\n\n{}",
            role_focus(role),
            response_contract()
        )
    }

    fn initial_prompt(&self, _role: AgentRole, context: &CommitContext) -> String {
        format!(
            "Evaluate commit {} by {} <{}>.\n\
             Date: {}\n\
             Files changed: {} (+{} / -{})\n\n\
             Message:\n{}\n\n\
             Diff:\n```diff\n{}\n```",
            context.short_hash(),
            context.author_name,
            context.author_email,
            context.timestamp.format("%Y-%m-%d %H:%M UTC"),
            context.files_changed,
            context.insertions,
            context.deletions,
            context.message.trim(),
            context.diff
        )
    }

    fn refinement_prompt(
        &self,
        _role: AgentRole,
        context: &CommitContext,
        prior_response: &str,
        self_questions: &[String],
        clarity_score: f64,
    ) -> String {
        let mut prompt = format!(
            "Your previous analysis of commit {} scored {:.0}% on clarity.\n\n",
            context.short_hash(),
            clarity_score * 100.0
        );

        if !self_questions.is_empty() {
            prompt.push_str("Address these questions in a revised analysis:\n");
            for (i, question) in self_questions.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, question));
            }
            prompt.push('\n');
        }

        prompt.push_str("Previous response:\n");
        prompt.push_str(prior_response.trim());
        prompt.push_str("\n\nReturn the complete revised JSON object, not a diff of it.");
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn context() -> CommitContext {
        CommitContext {
            hash: "0123456789abcdef".to_string(),
            author_name: "Dana".to_string(),
            author_email: "dana@example.com".to_string(),
            message: "Add retry to client\n\nLonger body".to_string(),
            timestamp: Utc::now(),
            diff: "+retry()".to_string(),
            files_changed: 1,
            insertions: 1,
            deletions: 0,
        }
    }

    #[test]
    fn test_system_prompt_names_every_pillar() {
        let prompt = RolePromptBuilder.system_prompt(AgentRole::Sdet);
        for metric in PillarMetric::ALL {
            assert!(prompt.contains(metric.key()));
        }
        assert!(prompt.contains("testCoverage"));
    }

    #[test]
    fn test_initial_prompt_includes_commit() {
        let prompt = RolePromptBuilder.initial_prompt(AgentRole::BusinessAnalyst, &context());
        assert!(prompt.contains("01234567"));
        assert!(prompt.contains("dana@example.com"));
        assert!(prompt.contains("+retry()"));
    }

    #[test]
    fn test_refinement_prompt_lists_questions() {
        let questions = vec!["Why?".to_string(), "How long?".to_string()];
        let prompt = RolePromptBuilder.refinement_prompt(
            AgentRole::SeniorArchitect,
            &context(),
            "{\"summary\": \"x\"}",
            &questions,
            0.45,
        );
        assert!(prompt.contains("45%"));
        assert!(prompt.contains("1. Why?"));
        assert!(prompt.contains("2. How long?"));
        assert!(prompt.contains("{\"summary\": \"x\"}"));
    }
}
