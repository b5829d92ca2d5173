//! Cross-agent weighted consensus for one commit.
//!
//! Every role votes on the eight pillars; votes are combined with the
//! (role x pillar) weight table. Null votes are excluded rather than treated
//! as zero, and a pillar nobody voted on is left out of the consensus.

use crate::config::WeightTable;
use crate::models::{
    AgentRole, ConsensusMetricSet, MetricContribution, PillarMetric, PillarMetrics,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Consensus values plus the votes that produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub consensus: ConsensusMetricSet,
    /// Every vote, including null ones, in pillar then role order.
    pub contributions: Vec<MetricContribution>,
}

impl ConsensusOutcome {
    /// Votes cast on one pillar.
    pub fn contributions_for(&self, metric: PillarMetric) -> impl Iterator<Item = &MetricContribution> {
        self.contributions.iter().filter(move |c| c.metric == metric)
    }
}

/// Combines the finalized analyses of one commit.
#[derive(Debug, Clone, Default)]
pub struct ConsensusAggregator {
    weights: WeightTable,
}

impl ConsensusAggregator {
    pub fn new(weights: WeightTable) -> Self {
        Self { weights }
    }

    /// Aggregate the metrics of every role that produced an analysis.
    pub fn aggregate<'a, I>(&self, votes: I) -> ConsensusOutcome
    where
        I: IntoIterator<Item = (AgentRole, &'a PillarMetrics)>,
    {
        let votes: Vec<(AgentRole, &PillarMetrics)> = votes.into_iter().collect();
        let mut metrics = PillarMetrics::default();
        let mut contributions = Vec::with_capacity(votes.len() * PillarMetric::ALL.len());

        for metric in PillarMetric::ALL {
            let start = contributions.len();
            contributions.extend(votes.iter().map(|(role, values)| MetricContribution {
                role: *role,
                metric,
                value: values.get(metric),
                weight: self.weights.weight(*role, metric),
            }));

            let value = weighted_value(metric, &contributions[start..]);
            if value.is_none() {
                debug!("No contributors for {}, omitting from consensus", metric.key());
            }
            metrics.set(metric, value);
        }

        ConsensusOutcome {
            consensus: ConsensusMetricSet {
                commit_score: compute_commit_score(&metrics),
                metrics,
            },
            contributions,
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Weighted mean of the non-null votes, kept within their range.
fn weighted_value(metric: PillarMetric, contributions: &[MetricContribution]) -> Option<f64> {
    let present: Vec<(f64, f64)> = contributions
        .iter()
        .filter_map(|c| c.value.map(|v| (v, c.weight)))
        .collect();

    if present.is_empty() {
        return None;
    }

    let total_weight: f64 = present.iter().map(|(_, w)| w).sum();
    let mean = if total_weight > 0.0 {
        present.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight
    } else {
        present.iter().map(|(v, _)| v).sum::<f64>() / present.len() as f64
    };

    let low = present.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min);
    let high = present.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max);
    let decimals = if metric.is_hours() { 2 } else { 1 };

    Some(round_to(mean, decimals).clamp(low, high))
}

/// Derived commit score in [1, 10].
///
/// Rewards quality and accurate estimation, penalizes complexity, and applies
/// a bounded penalty for rushed or sloppy work that fades as task duration
/// grows. Requires quality, complexity and both time pillars.
pub fn compute_commit_score(metrics: &PillarMetrics) -> Option<f64> {
    let quality = metrics.code_quality?;
    let complexity = metrics.code_complexity?;
    let actual_hours = metrics.actual_time_hours?;
    let ideal_hours = metrics.ideal_time_hours?;

    let normalized_estimation = if ideal_hours > 0.0 {
        (10.0 - (actual_hours - ideal_hours).abs() / ideal_hours * 10.0).max(0.0)
    } else {
        5.0
    };

    let actual_minutes = actual_hours * 60.0;
    let time_factor = 1.0 / (1.0 + (actual_minutes / 60.0).powi(2));
    let complexity_penalty = (complexity / 10.0).powi(2) * time_factor * 4.0;
    let quality_penalty = ((10.0 - quality) / 10.0).powi(2) * time_factor * 4.0;
    let penalty = complexity_penalty.max(quality_penalty).min(4.0);

    let score = quality * 0.4 - complexity * 0.3 + normalized_estimation * 0.3 + 3.0 - penalty;
    Some(score.clamp(1.0, 10.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_with(pairs: &[(PillarMetric, f64)]) -> PillarMetrics {
        let mut metrics = PillarMetrics::default();
        for (metric, value) in pairs {
            metrics.set(*metric, Some(*value));
        }
        metrics
    }

    #[test]
    fn test_weighted_average_of_two_agents() {
        let mut weights = WeightTable::uniform(0.0);
        weights.set(AgentRole::DeveloperReviewer, PillarMetric::CodeQuality, 0.6);
        weights.set(AgentRole::SeniorArchitect, PillarMetric::CodeQuality, 0.4);
        let aggregator = ConsensusAggregator::new(weights);

        let reviewer = metrics_with(&[(PillarMetric::CodeQuality, 8.0)]);
        let architect = metrics_with(&[(PillarMetric::CodeQuality, 6.0)]);
        let outcome = aggregator.aggregate([
            (AgentRole::DeveloperReviewer, &reviewer),
            (AgentRole::SeniorArchitect, &architect),
        ]);

        assert_eq!(outcome.consensus.metrics.code_quality, Some(7.2));
    }

    #[test]
    fn test_missing_pillars_are_omitted() {
        let aggregator = ConsensusAggregator::default();
        let author = metrics_with(&[(PillarMetric::ActualTimeHours, 3.0)]);
        let outcome = aggregator.aggregate([(AgentRole::DeveloperAuthor, &author)]);

        assert_eq!(outcome.consensus.metrics.actual_time_hours, Some(3.0));
        assert_eq!(outcome.consensus.metrics.code_quality, None);
        assert_eq!(outcome.consensus.metrics.non_null_count(), 1);
        assert_eq!(outcome.consensus.commit_score, None);
    }

    #[test]
    fn test_null_votes_are_not_zero_filled() {
        let aggregator = ConsensusAggregator::default();
        let voter = metrics_with(&[(PillarMetric::TestCoverage, 8.0)]);
        let silent = PillarMetrics::default();
        let outcome = aggregator.aggregate([
            (AgentRole::Sdet, &voter),
            (AgentRole::BusinessAnalyst, &silent),
        ]);

        assert_eq!(outcome.consensus.metrics.test_coverage, Some(8.0));
        let votes: Vec<_> = outcome.contributions_for(PillarMetric::TestCoverage).collect();
        assert_eq!(votes.len(), 2);
        assert!(votes.iter().any(|c| c.value.is_none()));
    }

    #[test]
    fn test_consensus_stays_within_contributor_range() {
        let aggregator = ConsensusAggregator::default();
        let samples = [
            [9.7, 2.1, 5.5, 6.0, 3.3],
            [7.04, 7.04, 7.04, 7.04, 7.04],
            [0.0, 10.0, 10.0, 0.0, 4.4],
        ];
        for values in samples {
            let metrics: Vec<PillarMetrics> = values
                .iter()
                .map(|v| metrics_with(&[(PillarMetric::CodeComplexity, *v)]))
                .collect();
            let outcome =
                aggregator.aggregate(AgentRole::ALL.iter().copied().zip(metrics.iter()));
            let value = outcome.consensus.metrics.code_complexity.unwrap();
            let low = values.iter().copied().fold(f64::INFINITY, f64::min);
            let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            assert!(value >= low && value <= high, "{value} outside [{low}, {high}]");
        }
    }

    #[test]
    fn test_zero_weights_fall_back_to_plain_mean() {
        let aggregator = ConsensusAggregator::new(WeightTable::uniform(0.0));
        let a = metrics_with(&[(PillarMetric::FunctionalImpact, 4.0)]);
        let b = metrics_with(&[(PillarMetric::FunctionalImpact, 6.0)]);
        let outcome = aggregator.aggregate([
            (AgentRole::BusinessAnalyst, &a),
            (AgentRole::Sdet, &b),
        ]);
        assert_eq!(outcome.consensus.metrics.functional_impact, Some(5.0));
    }

    #[test]
    fn test_hour_pillars_keep_two_decimals() {
        let aggregator = ConsensusAggregator::new(WeightTable::uniform(0.5));
        let a = metrics_with(&[(PillarMetric::TechnicalDebtHours, 1.25)]);
        let b = metrics_with(&[(PillarMetric::TechnicalDebtHours, 1.5)]);
        let outcome = aggregator.aggregate([
            (AgentRole::SeniorArchitect, &a),
            (AgentRole::DeveloperReviewer, &b),
        ]);
        assert_eq!(outcome.consensus.metrics.technical_debt_hours, Some(1.38));
    }

    #[test]
    fn test_commit_score_typical_commit() {
        let metrics = metrics_with(&[
            (PillarMetric::CodeQuality, 8.0),
            (PillarMetric::CodeComplexity, 4.0),
            (PillarMetric::IdealTimeHours, 3.0),
            (PillarMetric::ActualTimeHours, 4.0),
        ]);
        let score = compute_commit_score(&metrics).unwrap();
        assert!((score - 6.9624).abs() < 1e-3, "score was {score}");
    }

    #[test]
    fn test_rushed_sloppy_commit_hits_floor() {
        let metrics = metrics_with(&[
            (PillarMetric::CodeQuality, 2.0),
            (PillarMetric::CodeComplexity, 9.0),
            (PillarMetric::IdealTimeHours, 1.0),
            (PillarMetric::ActualTimeHours, 0.25),
        ]);
        assert_eq!(compute_commit_score(&metrics), Some(1.0));
    }

    #[test]
    fn test_perfect_commit_hits_ceiling() {
        let metrics = metrics_with(&[
            (PillarMetric::CodeQuality, 10.0),
            (PillarMetric::CodeComplexity, 0.0),
            (PillarMetric::IdealTimeHours, 10.0),
            (PillarMetric::ActualTimeHours, 10.0),
        ]);
        assert_eq!(compute_commit_score(&metrics), Some(10.0));
    }

    #[test]
    fn test_penalty_fades_with_duration() {
        let quick = metrics_with(&[
            (PillarMetric::CodeQuality, 5.0),
            (PillarMetric::CodeComplexity, 7.0),
            (PillarMetric::IdealTimeHours, 0.5),
            (PillarMetric::ActualTimeHours, 0.5),
        ]);
        let long = metrics_with(&[
            (PillarMetric::CodeQuality, 5.0),
            (PillarMetric::CodeComplexity, 7.0),
            (PillarMetric::IdealTimeHours, 8.0),
            (PillarMetric::ActualTimeHours, 8.0),
        ]);
        assert!(compute_commit_score(&quick).unwrap() < compute_commit_score(&long).unwrap());
    }

    #[test]
    fn test_zero_ideal_time_uses_neutral_estimation() {
        let metrics = metrics_with(&[
            (PillarMetric::CodeQuality, 7.0),
            (PillarMetric::CodeComplexity, 3.0),
            (PillarMetric::IdealTimeHours, 0.0),
            (PillarMetric::ActualTimeHours, 2.0),
        ]);
        // 2.8 - 0.9 + 1.5 + 3 - max(0.072, 0.072)
        let score = compute_commit_score(&metrics).unwrap();
        assert!((score - 6.328).abs() < 1e-9, "score was {score}");
    }
}
