//! Short-horizon trajectory estimation over the session's score history.
//!
//! The estimator keeps no state of its own: it reads the rolling
//! `(timestamp, score)` history a session records and derives momentum,
//! a qualitative label, and a time-to-next-transition estimate. The ETA
//! is a documented placeholder (`elapsed + padding`) with no learned
//! model behind it; see `TrajectoryConfig::eta_padding_minutes`.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TrajectoryConfig;

/// Qualitative label for a predicted near-future transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionLabel {
    /// No meaningful movement expected.
    Stable,
    /// Score is climbing.
    Ascending,
    /// Score is falling.
    Descending,
    /// Score variance is high; direction is unreliable.
    Oscillating,
    /// Strong sustained climb near the top of the scale.
    BreakthroughApproaching,
    /// Low-confidence default before any movement is observed.
    SubtleShift,
}

impl PredictionLabel {
    /// String form used in logs and payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Ascending => "ascending",
            Self::Descending => "descending",
            Self::Oscillating => "oscillating",
            Self::BreakthroughApproaching => "breakthrough_approaching",
            Self::SubtleShift => "subtle_shift",
        }
    }
}

impl std::fmt::Display for PredictionLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Predicted near-future transition carried on `LiveMetrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Estimated minutes (since session start) until the transition.
    pub eta_minutes: f64,
    /// Confidence in the prediction (0.0 to 1.0).
    pub confidence: f64,
    /// What kind of transition is expected.
    pub label: PredictionLabel,
}

impl Prediction {
    /// Documented low-confidence default for a fresh session:
    /// ETA 15 minutes, confidence 0.3.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            eta_minutes: 15.0,
            confidence: 0.3,
            label: PredictionLabel::SubtleShift,
        }
    }
}

/// One recorded score sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSample {
    pub timestamp: DateTime<Utc>,
    pub score: f64,
}

/// Bounded rolling history of score samples, oldest first.
///
/// Ring semantics: when full, pushing evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct ScoreHistory {
    samples: VecDeque<ScoreSample>,
    cap: usize,
}

impl ScoreHistory {
    /// Create an empty history bounded at `cap` samples.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// Record a sample, evicting the oldest when at capacity.
    pub fn push(&mut self, timestamp: DateTime<Utc>, score: f64) {
        if self.samples.len() >= self.cap {
            self.samples.pop_front();
        }
        self.samples.push_back(ScoreSample { timestamp, score });
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Highest score ever recorded in the retained window.
    #[must_use]
    pub fn peak(&self) -> f64 {
        self.samples.iter().map(|s| s.score).fold(0.0, f64::max)
    }

    /// Iterate samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ScoreSample> {
        self.samples.iter()
    }
}

/// Derives predictions from a session's score history.
#[derive(Debug, Clone, Default)]
pub struct TrajectoryEstimator {
    config: TrajectoryConfig,
}

impl TrajectoryEstimator {
    /// Create an estimator with the given parameters.
    #[must_use]
    pub fn new(config: TrajectoryConfig) -> Self {
        Self { config }
    }

    /// Predict the next transition from the recorded score history.
    ///
    /// Pure given its inputs. Label precedence:
    /// 1. variance over the last `variance_window` samples above the
    ///    threshold reads as oscillating, overriding momentum;
    /// 2. momentum above the threshold reads as breakthrough when the
    ///    full-window change and last score both clear their bars,
    ///    otherwise ascending;
    /// 3. momentum below the negative threshold reads as descending;
    /// 4. anything else is stable.
    #[must_use]
    pub fn predict(&self, history: &ScoreHistory, elapsed_minutes: f64) -> Prediction {
        let cfg = &self.config;
        let scores: Vec<f64> = history.iter().map(|s| s.score).collect();

        // Momentum is the delta between the last two recorded scores.
        let momentum = match scores.len() {
            0 | 1 => 0.0,
            n => scores[n - 1] - scores[n - 2],
        };

        let tail_start = scores.len().saturating_sub(cfg.variance_window);
        let variance = variance(&scores[tail_start..]);

        let overall_change = match (scores.first(), scores.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        };
        let last_score = scores.last().copied().unwrap_or(0.0);

        let label = if scores.len() < 2 {
            PredictionLabel::Stable
        } else if variance > cfg.variance_threshold {
            PredictionLabel::Oscillating
        } else if momentum > cfg.momentum_threshold {
            if overall_change > cfg.breakthrough_overall_change
                && last_score > cfg.breakthrough_score_floor
            {
                PredictionLabel::BreakthroughApproaching
            } else {
                PredictionLabel::Ascending
            }
        } else if momentum < -cfg.momentum_threshold {
            PredictionLabel::Descending
        } else {
            PredictionLabel::Stable
        };

        let confidence = (momentum.abs() * cfg.confidence_slope + cfg.base_confidence)
            .min(cfg.max_confidence);

        Prediction {
            eta_minutes: elapsed_minutes + cfg.eta_padding_minutes,
            confidence,
            label,
        }
    }
}

/// Population variance; zero for fewer than two values.
fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}
