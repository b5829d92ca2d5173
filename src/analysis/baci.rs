//! Team-level author normalization (BACI).
//!
//! Turns per-author {commit count, base quality} pairs into bounded,
//! team-relative scores. Low-volume authors are shrunk towards a quality
//! prior, volume is rewarded only when the cohort actually varies in volume,
//! and the result is centred on the cohort median through a logistic curve.

use crate::error::{EvalError, EvalResult};
use serde::{Deserialize, Serialize};

/// Lower bound of the output scale (exclusive).
const SCALE_FLOOR: f64 = 1.0;
/// Width of the output scale; `1 + 8.99` keeps results strictly below 10.
const SCALE_SPAN: f64 = 8.99;
/// Bound applied to volume z-scores.
const Z_CLIP: f64 = 2.0;

/// Normalization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaciConfig {
    /// Team prior quality (μ) that low-volume authors regress towards.
    #[serde(default = "default_quality_prior")]
    pub quality_prior: f64,

    /// Pseudo-commit count (κ) controlling how fast observed quality is trusted.
    #[serde(default = "default_shrinkage_strength")]
    pub shrinkage_strength: f64,

    /// Maximum relative boost or penalty from commit volume.
    #[serde(default = "default_volume_sensitivity")]
    pub volume_sensitivity: f64,

    /// Relative std-dev of commit counts below which volume is ignored.
    #[serde(default = "default_min_variation_threshold")]
    pub min_variation_threshold: f64,

    /// Logistic steepness (β).
    #[serde(default = "default_sigmoid_steepness")]
    pub sigmoid_steepness: f64,
}

impl Default for BaciConfig {
    fn default() -> Self {
        Self {
            quality_prior: default_quality_prior(),
            shrinkage_strength: default_shrinkage_strength(),
            volume_sensitivity: default_volume_sensitivity(),
            min_variation_threshold: default_min_variation_threshold(),
            sigmoid_steepness: default_sigmoid_steepness(),
        }
    }
}

fn default_quality_prior() -> f64 {
    5.0
}

fn default_shrinkage_strength() -> f64 {
    5.0
}

fn default_volume_sensitivity() -> f64 {
    0.15
}

fn default_min_variation_threshold() -> f64 {
    0.1
}

fn default_sigmoid_steepness() -> f64 {
    1.0
}

impl BaciConfig {
    /// Reject parameters the pipeline cannot handle.
    pub fn validate(&self) -> EvalResult<()> {
        let fields = [
            ("quality_prior", self.quality_prior),
            ("shrinkage_strength", self.shrinkage_strength),
            ("volume_sensitivity", self.volume_sensitivity),
            ("min_variation_threshold", self.min_variation_threshold),
            ("sigmoid_steepness", self.sigmoid_steepness),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| !v.is_finite()) {
            return Err(EvalError::InvalidConfig(format!("baci.{} must be finite", name)));
        }
        if self.shrinkage_strength <= 0.0 {
            return Err(EvalError::InvalidConfig(
                "baci.shrinkage_strength must be positive".to_string(),
            ));
        }
        if self.sigmoid_steepness <= 0.0 {
            return Err(EvalError::InvalidConfig(
                "baci.sigmoid_steepness must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.volume_sensitivity) {
            return Err(EvalError::InvalidConfig(
                "baci.volume_sensitivity must be in [0, 1)".to_string(),
            ));
        }
        if self.min_variation_threshold < 0.0 {
            return Err(EvalError::InvalidConfig(
                "baci.min_variation_threshold must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One author's raw cohort input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaciDataPoint {
    pub author_id: String,
    pub commits: u32,
    pub base_quality_score: f64,
}

impl BaciDataPoint {
    pub fn new(author_id: impl Into<String>, commits: u32, base_quality_score: f64) -> Self {
        Self {
            author_id: author_id.into(),
            commits,
            base_quality_score,
        }
    }
}

/// One author's normalized score and the intermediate values behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaciResult {
    pub author_id: String,
    /// Final score, strictly inside (1, 10).
    pub score: f64,
    pub shrunk_quality: f64,
    pub volume_multiplier: f64,
    pub raw_score: f64,
}

/// Population mean and standard deviation.
fn mean_and_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Logistic curve, evaluated without overflowing `exp` on either tail.
///
/// The result is kept at least one epsilon away from 0 and 1 so the scaled
/// score never lands on either bound of the scale.
fn logistic(x: f64) -> f64 {
    let value = if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    };
    value.clamp(f64::EPSILON, 1.0 - f64::EPSILON)
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Normalize a cohort. Output order follows input order.
pub fn compute_baci(points: &[BaciDataPoint], config: &BaciConfig) -> EvalResult<Vec<BaciResult>> {
    config.validate()?;

    if let Some(bad) = points.iter().find(|p| !p.base_quality_score.is_finite()) {
        return Err(EvalError::InvalidNumericInput {
            subject: bad.author_id.clone(),
            detail: format!("base quality score {} is not finite", bad.base_quality_score),
        });
    }

    if points.is_empty() {
        return Ok(Vec::new());
    }

    let counts: Vec<f64> = points.iter().map(|p| f64::from(p.commits)).collect();
    let (mean_commits, std_commits) = mean_and_std(&counts);
    let relative_std = if mean_commits <= 0.0 {
        f64::INFINITY
    } else {
        std_commits / mean_commits
    };
    let volume_homogeneous = relative_std < config.min_variation_threshold || std_commits == 0.0;

    let staged: Vec<(f64, f64, f64)> = points
        .iter()
        .zip(&counts)
        .map(|(point, &n)| {
            let alpha = n / (n + config.shrinkage_strength);
            let shrunk = alpha * point.base_quality_score + (1.0 - alpha) * config.quality_prior;

            let multiplier = if volume_homogeneous {
                1.0
            } else {
                let z = ((n - mean_commits) / std_commits).clamp(-Z_CLIP, Z_CLIP);
                1.0 + config.volume_sensitivity * z.tanh()
            };

            (shrunk, multiplier, shrunk * multiplier)
        })
        .collect();

    let raws: Vec<f64> = staged.iter().map(|(_, _, raw)| *raw).collect();
    let center = median(&raws);

    Ok(points
        .iter()
        .zip(staged)
        .map(|(point, (shrunk, multiplier, raw))| {
            let normalized = logistic(config.sigmoid_steepness * (raw - center));
            BaciResult {
                author_id: point.author_id.clone(),
                score: SCALE_FLOOR + SCALE_SPAN * normalized,
                shrunk_quality: shrunk,
                volume_multiplier: multiplier,
                raw_score: raw,
            }
        })
        .collect())
}
