//! Clarity evaluation of agent responses.
//!
//! An agent's response is expected to carry one JSON object with `summary`,
//! `details`, `metrics` and `confidence`. The evaluator scores how complete
//! and substantively justified that object is, and produces the questions
//! the agent should answer in its next refinement pass.

use crate::error::{EvalError, EvalResult};
use crate::models::{json_number, AnalysisPayload, PillarMetric};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Score assigned to responses that do not contain a parseable JSON object.
pub const MALFORMED_SCORE: f64 = 0.3;

const MALFORMED_QUESTION: &str = "Your response could not be parsed. Can you restructure it as a single valid JSON object with summary, details, metrics and confidence fields?";

const GENERIC_SUMMARIES: &[&str] = &[
    "ok",
    "okay",
    "good",
    "fine",
    "looks good",
    "looks fine",
    "lgtm",
    "no issues",
    "n/a",
    "none",
    "done",
    "updated code",
    "code changes",
    "minor changes",
    "small fix",
    "bug fix",
    "changes made",
];

const CONCERN_KEYWORDS: &[&str] = &[
    "risk",
    "concern",
    "issue",
    "bug",
    "vulnerab",
    "regression",
    "debt",
    "complex",
    "performance",
    "security",
    "missing",
    "lack",
    "fragile",
    "untested",
    "breaking",
];

const TECHNICAL_TERMS: &[&str] = &[
    "function",
    "method",
    "module",
    "class",
    "struct",
    "trait",
    "interface",
    "api",
    "endpoint",
    "schema",
    "database",
    "query",
    "test",
    "refactor",
    "dependency",
    "error handling",
    "abstraction",
    "coupling",
    "cohesion",
    "architecture",
    "component",
    "async",
    "concurren",
    "validation",
    "algorithm",
    "config",
];

const CAUSAL_TERMS: &[&str] = &[
    "because",
    "due to",
    "therefore",
    "since",
    "as a result",
    "which means",
    "leads to",
    "so that",
    "resulting in",
    "consequently",
    "thus",
];

const SCORING_TERMS: &[&str] = &[
    "score",
    "rated",
    "rating",
    "estimate",
    "justif",
    "reflect",
    "assigned",
    "out of 10",
    "/10",
    "weighted",
];

const FILE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "c", "cpp", "h", "hpp", "cs", "rb",
    "php", "swift", "kt", "scala", "vue", "toml", "json", "yaml", "yml", "md", "sql", "sh",
];

/// Criterion weights. They sum to 1.0 so the score stays in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarityWeights {
    pub has_summary: f64,
    pub has_details: f64,
    pub has_metrics: f64,
    pub metrics_not_null: f64,
    pub has_reasonable_scores: f64,
    /// Tracked for reporting only.
    pub has_confidence: f64,
    pub summary_quality: f64,
    pub details_quality: f64,
    pub metrics_justified: f64,
}

impl ClarityWeights {
    pub const DEFAULT: ClarityWeights = ClarityWeights {
        has_summary: 0.10,
        has_details: 0.10,
        has_metrics: 0.10,
        metrics_not_null: 0.05,
        has_reasonable_scores: 0.05,
        has_confidence: 0.00,
        summary_quality: 0.20,
        details_quality: 0.25,
        metrics_justified: 0.15,
    };

    pub fn total(&self) -> f64 {
        self.has_summary
            + self.has_details
            + self.has_metrics
            + self.metrics_not_null
            + self.has_reasonable_scores
            + self.has_confidence
            + self.summary_quality
            + self.details_quality
            + self.metrics_justified
    }

    pub fn validate(&self) -> EvalResult<()> {
        let fields = [
            self.has_summary,
            self.has_details,
            self.has_metrics,
            self.metrics_not_null,
            self.has_reasonable_scores,
            self.has_confidence,
            self.summary_quality,
            self.details_quality,
            self.metrics_justified,
        ];
        if fields.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EvalError::InvalidConfig(
                "clarity weights must be non-negative numbers".to_string(),
            ));
        }
        if (self.total() - 1.0).abs() > 1e-6 {
            return Err(EvalError::InvalidConfig(format!(
                "clarity weights must sum to 1.0, got {:.4}",
                self.total()
            )));
        }
        Ok(())
    }
}

impl Default for ClarityWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Which criteria a response satisfied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClarityCriteria {
    pub has_summary: bool,
    pub has_details: bool,
    pub has_metrics: bool,
    pub metrics_not_null: bool,
    pub has_reasonable_scores: bool,
    pub has_confidence: bool,
    pub summary_quality: bool,
    pub details_quality: bool,
    pub metrics_justified: bool,
}

impl ClarityCriteria {
    fn score(&self, weights: &ClarityWeights) -> f64 {
        let pairs = [
            (self.has_summary, weights.has_summary),
            (self.has_details, weights.has_details),
            (self.has_metrics, weights.has_metrics),
            (self.metrics_not_null, weights.metrics_not_null),
            (self.has_reasonable_scores, weights.has_reasonable_scores),
            (self.has_confidence, weights.has_confidence),
            (self.summary_quality, weights.summary_quality),
            (self.details_quality, weights.details_quality),
            (self.metrics_justified, weights.metrics_justified),
        ];
        let sum: f64 = pairs.iter().filter(|(met, _)| *met).map(|(_, w)| w).sum();
        // Rounded so that sums like 0.1 + 0.7 compare cleanly with thresholds.
        ((sum * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
    }
}

/// Verdict on one agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarityEvaluation {
    pub score: f64,
    pub has_enough_info: bool,
    pub self_questions: Vec<String>,
    /// `None` when the response could not be parsed.
    pub criteria: Option<ClarityCriteria>,
}

impl ClarityEvaluation {
    fn malformed() -> Self {
        Self {
            score: MALFORMED_SCORE,
            has_enough_info: false,
            self_questions: vec![MALFORMED_QUESTION.to_string()],
            criteria: None,
        }
    }

    /// Whether the evaluated text failed to parse.
    pub fn is_malformed(&self) -> bool {
        self.criteria.is_none()
    }
}

/// Evaluator with configurable criterion weights.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClarityEvaluator {
    weights: ClarityWeights,
}

impl ClarityEvaluator {
    pub fn new(weights: ClarityWeights) -> Self {
        Self { weights }
    }

    /// Evaluate a raw agent response. Never fails: unparseable text scores
    /// [`MALFORMED_SCORE`] and asks for valid JSON.
    pub fn evaluate(&self, text: &str, threshold: f64) -> ClarityEvaluation {
        let Some(value) = extract_json_object(text) else {
            debug!("Clarity check: response is not a parseable JSON object");
            return ClarityEvaluation::malformed();
        };

        let facts = ResponseFacts::from_value(&value);
        let criteria = facts.criteria();
        let score = criteria.score(&self.weights);

        ClarityEvaluation {
            score,
            has_enough_info: score >= threshold,
            self_questions: facts.self_questions(&criteria),
            criteria: Some(criteria),
        }
    }
}

/// Evaluate with the default weights.
#[allow(dead_code)] // Convenience wrapper
pub fn evaluate(text: &str, threshold: f64) -> ClarityEvaluation {
    ClarityEvaluator::default().evaluate(text, threshold)
}

/// Parse an agent response into a payload, if it carries a JSON object.
pub fn parse_analysis(text: &str) -> Option<AnalysisPayload> {
    extract_json_object(text).map(|value| AnalysisPayload::from_json(&value))
}

/// Drop markdown code fence lines.
fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Locate the first balanced `{...}` block and parse it.
///
/// Braces inside JSON string literals do not count towards the balance.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let cleaned = strip_code_fences(text);
    let start = cleaned.find('{')?;

    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in cleaned[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return serde_json::from_str::<Value>(&cleaned[start..end])
                        .ok()
                        .filter(Value::is_object);
                }
            }
            _ => {}
        }
    }

    None
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// True for tokens such as `src/lib.rs` or `config.toml`.
fn looks_like_file(token: &str) -> bool {
    let token = token.trim_matches(|c: char| {
        !c.is_alphanumeric() && c != '.' && c != '/' && c != '_' && c != '-'
    });
    let token = token.trim_end_matches('.');

    if token.contains('/') && token.chars().any(char::is_alphabetic) {
        return true;
    }

    match token.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && FILE_EXTENSIONS.contains(&ext),
        None => false,
    }
}

fn is_generic_summary(summary: &str) -> bool {
    let normalized = summary
        .trim()
        .trim_end_matches(['.', '!'])
        .to_lowercase();
    GENERIC_SUMMARIES.contains(&normalized.as_str()) || normalized.split_whitespace().count() < 4
}

/// Facts extracted from a parsed response, shared by scoring and coaching.
struct ResponseFacts {
    summary: String,
    details: String,
    missing_keys: Vec<&'static str>,
    unknown_keys: Vec<String>,
    null_keys: Vec<&'static str>,
    out_of_range_keys: Vec<&'static str>,
    non_null: usize,
    has_confidence: bool,
}

impl ResponseFacts {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string()
        };

        let metrics = value.get("metrics").and_then(Value::as_object);
        let mut missing_keys = Vec::new();
        let mut null_keys = Vec::new();
        let mut out_of_range_keys = Vec::new();

        for metric in PillarMetric::ALL {
            match metrics.and_then(|m| m.get(metric.key())) {
                None => {
                    missing_keys.push(metric.key());
                    null_keys.push(metric.key());
                }
                Some(Value::Null) => null_keys.push(metric.key()),
                Some(raw) => {
                    let acceptable = json_number(raw).is_some_and(|v| metric.accepts(v));
                    if !acceptable {
                        out_of_range_keys.push(metric.key());
                    }
                }
            }
        }

        let unknown_keys = metrics
            .map(|m| {
                m.keys()
                    .filter(|key| PillarMetric::ALL.iter().all(|metric| metric.key() != key.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            summary: text("summary"),
            details: text("details"),
            non_null: PillarMetric::ALL.len() - null_keys.len(),
            missing_keys,
            unknown_keys,
            null_keys,
            out_of_range_keys,
            has_confidence: value.get("confidence").is_some_and(|c| !c.is_null()),
        }
    }

    fn summary_len(&self) -> usize {
        self.summary.chars().count()
    }

    fn details_len(&self) -> usize {
        self.details.chars().count()
    }

    /// Minimum details length needed to justify the reported metrics.
    fn justification_floor(&self) -> usize {
        (50 * self.non_null).min(150)
    }

    fn summary_quality(&self) -> bool {
        if is_generic_summary(&self.summary) {
            return false;
        }
        let lower = self.summary.to_lowercase();
        let mentions_score = lower.chars().any(|c| c.is_ascii_digit())
            && contains_any(&lower, &["/10", "score", "rated", "rating", "out of"]);
        let separators = self
            .summary
            .chars()
            .filter(|c| matches!(c, ',' | ';' | ':'))
            .count();

        mentions_score || contains_any(&lower, CONCERN_KEYWORDS) || separators >= 2
    }

    fn details_quality(&self) -> bool {
        if self.details_len() <= 100 {
            return false;
        }
        let lower = self.details.to_lowercase();
        let concrete = self.details.chars().any(|c| c.is_ascii_digit())
            || self.details.split_whitespace().any(looks_like_file);

        contains_any(&lower, TECHNICAL_TERMS) && (contains_any(&lower, CAUSAL_TERMS) || concrete)
    }

    fn metrics_justified(&self) -> bool {
        if self.non_null == 0 {
            return false;
        }
        let floor = self.justification_floor();
        let len = self.details_len();
        if len < floor {
            return false;
        }
        let lower = self.details.to_lowercase();
        contains_any(&lower, SCORING_TERMS) || len as f64 > floor as f64 * 1.5
    }

    fn criteria(&self) -> ClarityCriteria {
        ClarityCriteria {
            has_summary: self.summary_len() > 20,
            has_details: self.details_len() > 50,
            has_metrics: self.missing_keys.is_empty() && self.unknown_keys.is_empty(),
            metrics_not_null: self.non_null >= 5,
            has_reasonable_scores: self.out_of_range_keys.is_empty(),
            has_confidence: self.has_confidence,
            summary_quality: self.summary_quality(),
            details_quality: self.details_quality(),
            metrics_justified: self.metrics_justified(),
        }
    }

    /// Quality gaps first, then structural gaps.
    fn self_questions(&self, criteria: &ClarityCriteria) -> Vec<String> {
        let mut questions = Vec::new();

        if !criteria.summary_quality {
            questions.push(
                "Can you make the summary specific: name the main strength or concern and reference the scores you assigned?"
                    .to_string(),
            );
        }
        if !criteria.details_quality {
            questions.push(
                "Can you expand the details with concrete technical observations (files, functions, numbers) and explain the cause and effect behind them?"
                    .to_string(),
            );
        }
        if !criteria.metrics_justified {
            questions.push(
                "Can you justify each metric in the details, explaining why each score or estimate was assigned?"
                    .to_string(),
            );
        }

        if !criteria.has_summary {
            questions.push(
                "Can you provide a summary of at least one full sentence describing what the commit does?"
                    .to_string(),
            );
        }
        if !criteria.has_details {
            questions.push(
                "Can you provide a detailed analysis (more than 50 characters) in the details field?"
                    .to_string(),
            );
        }
        if !self.missing_keys.is_empty() {
            questions.push(format!(
                "Can you provide all 8 metrics? Missing: {}.",
                self.missing_keys.join(", ")
            ));
        }
        if !self.unknown_keys.is_empty() {
            questions.push(format!(
                "Can you report exactly the 8 requested metrics? Unexpected: {}.",
                self.unknown_keys.join(", ")
            ));
        }
        if (1..=2).contains(&self.null_keys.len()) {
            questions.push(format!(
                "Can you provide values for {} instead of leaving them null?",
                self.null_keys.join(" and ")
            ));
        }
        if !criteria.has_reasonable_scores {
            questions.push(format!(
                "Can you correct {}? Scores must be between 0 and 10 and hour estimates must be non-negative numbers.",
                self.out_of_range_keys.join(", ")
            ));
        }
        if !criteria.has_confidence {
            questions.push("Can you state your confidence (0 to 1) in this analysis?".to_string());
        }

        questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_response() -> String {
        serde_json::json!({
            "summary": "Adds capped exponential backoff to the HTTP client, quality 8/10; minor risk in the retry loop.",
            "details": "The change wraps request dispatch in src/http/client.rs with a retry loop of up to 3 attempts. Because the backoff is capped, the function cannot stall callers indefinitely. Code quality is scored 8 since error handling is explicit; complexity is rated 4 as the loop adds one branch. The ideal time estimate is 3 hours versus 4 actual hours.",
            "metrics": {
                "functionalImpact": 6,
                "idealTimeHours": 3,
                "testCoverage": 5,
                "codeQuality": 8,
                "codeComplexity": 4,
                "actualTimeHours": 4,
                "technicalDebtHours": 0.5,
                "debtReductionHours": 1
            },
            "confidence": 0.8
        })
        .to_string()
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((ClarityWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_text_scores_fixed_value() {
        for text in ["", "no json here", "{\"summary\": \"unterminated\"", "}{", "{not json}"] {
            let eval = evaluate(text, 0.5);
            assert_eq!(eval.score, MALFORMED_SCORE, "text: {text}");
            assert!(!eval.has_enough_info);
            assert!(eval.is_malformed());
            assert!(eval.self_questions[0].contains("valid JSON"));
        }
    }

    #[test]
    fn test_sparse_response_scores_low_with_questions() {
        let eval = evaluate(
            r#"{"summary":"ok","details":"","metrics":{},"confidence":0.5}"#,
            0.8,
        );

        assert!(eval.score < 0.2);
        assert!(!eval.has_enough_info);
        let joined = eval.self_questions.join("\n").to_lowercase();
        assert!(joined.contains("summary"));
        assert!(joined.contains("details"));
        assert!(joined.contains("all 8 metrics"));
        // Eight nulls are too many to coach one by one.
        assert!(!joined.contains("instead of leaving them null"));
    }

    #[test]
    fn test_complete_response_reaches_full_score() {
        let eval = evaluate(&complete_response(), 0.8);
        let criteria = eval.criteria.unwrap();

        assert!(criteria.summary_quality);
        assert!(criteria.details_quality);
        assert!(criteria.metrics_justified);
        assert_eq!(eval.score, 1.0);
        assert!(eval.has_enough_info);
        assert!(eval.self_questions.is_empty());
    }

    #[test]
    fn test_fenced_response_is_parsed() {
        let fenced = format!("Here is my analysis:\n```json\n{}\n```\nThanks!", complete_response());
        assert_eq!(evaluate(&fenced, 0.8).score, 1.0);
    }

    #[test]
    fn test_braces_inside_strings_do_not_break_extraction() {
        let text = r#"{"summary": "Handles the {placeholder} case }", "details": "x"} trailing"#;
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["summary"], "Handles the {placeholder} case }");
    }

    #[test]
    fn test_extra_metric_keys_fail_the_metrics_check() {
        let mut value: Value = serde_json::from_str(&complete_response()).unwrap();
        value["metrics"]["linesOfCode"] = serde_json::json!(120);

        let eval = evaluate(&value.to_string(), 0.8);
        let criteria = eval.criteria.unwrap();

        assert!(!criteria.has_metrics);
        assert!(eval.score < 1.0);
        assert!(eval
            .self_questions
            .iter()
            .any(|q| q.contains("Unexpected: linesOfCode")));
    }

    #[test]
    fn test_one_null_metric_is_named() {
        let mut value: Value = serde_json::from_str(&complete_response()).unwrap();
        value["metrics"]["testCoverage"] = Value::Null;

        let eval = evaluate(&value.to_string(), 0.8);
        assert!(eval
            .self_questions
            .iter()
            .any(|q| q.contains("testCoverage") && q.contains("null")));
    }

    #[test]
    fn test_out_of_range_scores_are_flagged() {
        let mut value: Value = serde_json::from_str(&complete_response()).unwrap();
        value["metrics"]["codeQuality"] = serde_json::json!(14);

        let eval = evaluate(&value.to_string(), 0.8);
        assert!(!eval.criteria.unwrap().has_reasonable_scores);
        assert!((eval.score - 0.95).abs() < 1e-9);
        assert!(eval.self_questions.iter().any(|q| q.contains("codeQuality")));
    }

    #[test]
    fn test_quality_questions_come_before_structural_ones() {
        let eval = evaluate(r#"{"summary":"fine","metrics":{}}"#, 0.8);
        let quality = eval
            .self_questions
            .iter()
            .position(|q| q.contains("justify"))
            .unwrap();
        let structural = eval
            .self_questions
            .iter()
            .position(|q| q.contains("all 8 metrics"))
            .unwrap();
        assert!(quality < structural);
    }

    #[test]
    fn test_score_bounds_and_threshold_consistency() {
        let samples = [
            complete_response(),
            r#"{"summary":"ok"}"#.to_string(),
            r#"{}"#.to_string(),
            "garbage".to_string(),
        ];
        for sample in &samples {
            for threshold in [0.0, 0.3, 0.8, 1.0] {
                let eval = evaluate(sample, threshold);
                assert!((0.0..=1.0).contains(&eval.score));
                if eval.is_malformed() {
                    assert!(!eval.has_enough_info);
                } else {
                    assert_eq!(eval.has_enough_info, eval.score >= threshold);
                }
            }
        }
    }

    #[test]
    fn test_generic_summaries() {
        assert!(is_generic_summary("Looks good."));
        assert!(is_generic_summary("Small change"));
        assert!(!is_generic_summary("Refactors the parser into smaller functions"));
    }

    #[test]
    fn test_file_detection() {
        assert!(looks_like_file("src/main.rs"));
        assert!(looks_like_file("(Cargo.toml)"));
        assert!(!looks_like_file("end."));
        assert!(!looks_like_file("3.5"));
    }

    #[test]
    fn test_parse_analysis() {
        let payload = parse_analysis(&complete_response()).unwrap();
        assert_eq!(payload.metrics.non_null_count(), 8);
        assert!(parse_analysis("nothing").is_none());
    }
}
