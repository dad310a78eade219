//! Live session metrics and the pure aggregation step.
//!
//! [`LiveMetrics`] is a value type: each turn computes a complete new
//! snapshot and the registry swaps it in whole, so a failed turn can
//! never leave a half-updated snapshot behind. The aggregation itself
//! ([`MetricsAggregator::update`]) is pure — time comes in as an
//! argument, nothing is read from or written to shared state.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::CompositeAssessment;
use crate::config::AggregatorConfig;
use crate::event::MonitoringEvent;
use crate::trajectory::Prediction;

/// Weight per detected sub-pattern when deriving indicator strength.
const INDICATOR_PATTERN_WEIGHT: f64 = 0.2;

/// Weight per detected sub-pattern inside the unified strength average.
const UNIFIED_PATTERN_WEIGHT: f64 = 0.1;

/// Qualitative direction of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    Ascending,
    Stable,
    Descending,
    /// Large swing shortly after a threshold-exceeded event.
    Fluctuating,
}

impl Trajectory {
    /// String form used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "ascending",
            Self::Stable => "stable",
            Self::Descending => "descending",
            Self::Fluctuating => "fluctuating",
        }
    }
}

impl std::fmt::Display for Trajectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Named sub-scores carried through from the assessment provider.
///
/// Fields the provider omits keep their previous value; the fallback is
/// applied here, once, instead of at each consumer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SecondaryScores {
    /// Coherence of the conversational field.
    pub field_coherence: f64,
    /// Strength of AI-side indicators.
    pub indicator_strength: f64,
    /// Depth of the participant's engagement.
    pub depth: f64,
    /// Combined strength across all inputs.
    pub unified_strength: f64,
}

impl SecondaryScores {
    /// Documented low-confidence defaults for a fresh session.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            field_coherence: 0.2,
            indicator_strength: 0.1,
            depth: 0.2,
            unified_strength: 0.15,
        }
    }

    /// Fold a new assessment into these scores.
    ///
    /// Provider values are clamped to [0, 1] regardless of how the
    /// assessment was built. Per-field policy:
    /// - `field_coherence`, `depth`: provider value, else previous.
    /// - `indicator_strength`: provider value; else derived from the
    ///   pattern count (0.2 per pattern, capped at 1.0) when patterns
    ///   are present; else previous.
    /// - `unified_strength`: provider value; else the mean of depth,
    ///   scaled pattern count, coherence, and integration (0.0 when the
    ///   provider omits integration), each input and the result clamped
    ///   to [0, 1].
    #[must_use]
    pub fn fold(&self, assessment: &CompositeAssessment) -> Self {
        // Provider values may arrive unclamped (deserialized payloads
        // skip the builder), so every field is clamped here.
        let field_coherence = assessment
            .field_coherence
            .map_or(self.field_coherence, |v| v.clamp(0.0, 1.0));
        let depth = assessment.depth.map_or(self.depth, |v| v.clamp(0.0, 1.0));

        let indicator_strength = assessment
            .indicator_strength
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or_else(|| {
                if assessment.patterns.is_empty() {
                    self.indicator_strength
                } else {
                    (assessment.patterns.len() as f64 * INDICATOR_PATTERN_WEIGHT).min(1.0)
                }
            });

        let unified_strength = assessment
            .unified_strength
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or_else(|| {
                let pattern_term = assessment.patterns.len() as f64 * UNIFIED_PATTERN_WEIGHT;
                let integration = assessment.integration.unwrap_or(0.0);
                let inputs = [depth, pattern_term, field_coherence, integration];
                let sum: f64 = inputs.iter().map(|v| v.clamp(0.0, 1.0)).sum();
                (sum / inputs.len() as f64).clamp(0.0, 1.0)
            });

        Self {
            field_coherence,
            indicator_strength,
            depth,
            unified_strength,
        }
    }
}

/// Current snapshot of a monitored session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    /// Composite score (0.0 to 1.0).
    pub score_level: f64,
    /// Direction the score is moving.
    pub trajectory: Trajectory,
    /// Sub-scores carried through from the provider.
    pub secondary: SecondaryScores,
    /// Minutes since the session started.
    pub session_duration_minutes: f64,
    /// Events within the rolling recent window (a view over the
    /// session's event history, recomputed each turn).
    pub recent_events: Vec<MonitoringEvent>,
    /// Predicted next transition.
    pub next_prediction: Prediction,
}

impl LiveMetrics {
    /// Documented low-confidence defaults for a fresh session:
    /// score 0.1, stable trajectory, prediction ETA 15 min at
    /// confidence 0.3.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            score_level: 0.1,
            trajectory: Trajectory::Stable,
            secondary: SecondaryScores::initial(),
            session_duration_minutes: 0.0,
            recent_events: Vec::new(),
            next_prediction: Prediction::initial(),
        }
    }
}

/// Folds each new assessment into a fresh `LiveMetrics` snapshot.
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    config: AggregatorConfig,
}

impl MetricsAggregator {
    /// Create an aggregator with the given thresholds.
    #[must_use]
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    /// Rolling window for the `recent_events` view.
    #[must_use]
    pub fn recent_window(&self) -> Duration {
        Duration::seconds(self.config.recent_window_seconds)
    }

    /// Lookback window for the fluctuation rule.
    #[must_use]
    pub fn fluctuation_lookback(&self) -> Duration {
        Duration::seconds((self.config.fluctuation_lookback_minutes * 60.0) as i64)
    }

    /// Compute the next metrics snapshot from the previous one.
    ///
    /// `lookback_events` are the session's events within the fluctuation
    /// lookback window; they decide whether a large delta reads as
    /// `fluctuating`. Pure given its inputs: same arguments, same
    /// snapshot. The caller owns committing the result and refreshing
    /// `recent_events` and `next_prediction` afterwards.
    #[must_use]
    pub fn update(
        &self,
        old: &LiveMetrics,
        assessment: &CompositeAssessment,
        elapsed_minutes: f64,
        lookback_events: &[MonitoringEvent],
        now: DateTime<Utc>,
    ) -> LiveMetrics {
        let score_level = assessment.overall_confidence.clamp(0.0, 1.0);
        let delta = score_level - old.score_level;

        let trajectory = self.trajectory_for(delta, lookback_events, now);

        LiveMetrics {
            score_level,
            trajectory,
            secondary: old.secondary.fold(assessment),
            session_duration_minutes: elapsed_minutes,
            // Carried forward; the registry rebuilds the view after the
            // turn's events are appended to history.
            recent_events: old.recent_events.clone(),
            // Carried forward; replaced by the provider forecast or the
            // trajectory estimator on commit.
            next_prediction: old.next_prediction.clone(),
        }
    }

    /// Ordered trajectory rule table; first match wins.
    fn trajectory_for(
        &self,
        delta: f64,
        lookback_events: &[MonitoringEvent],
        now: DateTime<Utc>,
    ) -> Trajectory {
        let cfg = &self.config;
        let recent_threshold_hit = lookback_events
            .iter()
            .any(|e| e.is_threshold_exceeded() && e.is_within(self.fluctuation_lookback(), now));

        if delta.abs() > cfg.fluctuation_delta && recent_threshold_hit {
            Trajectory::Fluctuating
        } else if delta.abs() < cfg.deadband {
            Trajectory::Stable
        } else if delta > 0.0 {
            Trajectory::Ascending
        } else {
            Trajectory::Descending
        }
    }
}
