//! Monitoring pipeline configuration.
//!
//! Every threshold the pipeline applies lives here as a documented field
//! with its default value, rather than being re-derived at call sites.
//! All sections support partial TOML overrides via `#[serde(default)]`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};

/// Top-level configuration for the monitoring pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Metrics aggregation (trajectory rule) thresholds.
    pub aggregator: AggregatorConfig,
    /// Event detection thresholds.
    pub detector: DetectorConfig,
    /// Alert rule thresholds and debounce window.
    pub alerts: AlertConfig,
    /// Trajectory estimation and prediction parameters.
    pub trajectory: TrajectoryConfig,
    /// Bounds on per-session rolling histories.
    pub history: HistoryConfig,
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| MonitorError::Config(e.to_string()))
    }
}

/// Thresholds governing how a new assessment folds into `LiveMetrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Deltas below this magnitude are treated as `stable`.
    pub deadband: f64,
    /// Minimum delta magnitude for the `fluctuating` label.
    pub fluctuation_delta: f64,
    /// How far back to look for a threshold-exceeded event when
    /// deciding `fluctuating`.
    pub fluctuation_lookback_minutes: f64,
    /// Rolling window for the `recent_events` view on metrics.
    pub recent_window_seconds: i64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            deadband: 0.05,
            fluctuation_delta: 0.1,
            fluctuation_lookback_minutes: 5.0,
            recent_window_seconds: 60,
        }
    }
}

/// Thresholds for the four event detection rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Score level above which a threshold-exceeded event fires.
    pub high_score_threshold: f64,
    /// Assessment confidence required alongside the high score.
    pub high_score_confidence: f64,
    /// Sub-patterns below this confidence are ignored.
    pub pattern_confidence_floor: f64,
    /// At least one sub-pattern must clear this bar for a pattern
    /// event to be emitted at all.
    pub pattern_critical_confidence: f64,
    /// Minimum coherence change to count as a trend shift.
    pub coherence_shift_threshold: f64,
    /// Coherence change above which the shift is high severity.
    pub coherence_shift_high: f64,
    /// Minimum forecast confidence to emit a prediction event.
    pub forecast_confidence_floor: f64,
    /// Forecast confidence above which the event is high severity.
    pub forecast_high_confidence: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            high_score_threshold: 0.7,
            high_score_confidence: 0.7,
            pattern_confidence_floor: 0.6,
            pattern_critical_confidence: 0.8,
            coherence_shift_threshold: 0.3,
            coherence_shift_high: 0.5,
            forecast_confidence_floor: 0.7,
            forecast_high_confidence: 0.8,
        }
    }
}

/// Thresholds for the four alert rules plus the dedup debounce window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Score level above which a breakthrough alert fires.
    pub breakthrough_threshold: f64,
    /// Coherence below this floor triggers a coherence-drop alert.
    pub coherence_floor: f64,
    /// Session age before the coherence-drop rule applies.
    pub coherence_min_minutes: f64,
    /// Indicator strength above which an indicator-spike alert fires.
    pub indicator_threshold: f64,
    /// Unified strength above which an integration-window alert fires.
    pub integration_threshold: f64,
    /// Session age before the integration-window rule applies.
    pub integration_min_minutes: f64,
    /// Same-kind unresolved alerts within this window are suppressed.
    pub debounce_seconds: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            breakthrough_threshold: 0.8,
            coherence_floor: 0.3,
            coherence_min_minutes: 10.0,
            indicator_threshold: 0.6,
            integration_threshold: 0.7,
            integration_min_minutes: 15.0,
            debounce_seconds: 10,
        }
    }
}

/// Parameters for short-horizon trajectory estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryConfig {
    /// Score variance above which the trajectory reads as oscillating.
    pub variance_threshold: f64,
    /// Number of most recent samples the variance is computed over.
    pub variance_window: usize,
    /// Momentum magnitude required for ascending/descending labels.
    pub momentum_threshold: f64,
    /// Overall change over the window required for the breakthrough label.
    pub breakthrough_overall_change: f64,
    /// Last score must clear this bar for the breakthrough label.
    pub breakthrough_score_floor: f64,
    /// Confidence is `min(max, |momentum| * slope + base)`.
    pub confidence_slope: f64,
    /// Base prediction confidence when momentum is zero.
    pub base_confidence: f64,
    /// Prediction confidence ceiling.
    pub max_confidence: f64,
    /// ETA placeholder: predicted minutes past the current elapsed time.
    /// No learned model backs this; it is a documented default policy.
    pub eta_padding_minutes: f64,
}

impl Default for TrajectoryConfig {
    fn default() -> Self {
        Self {
            variance_threshold: 0.1,
            variance_window: 3,
            momentum_threshold: 0.1,
            breakthrough_overall_change: 0.4,
            breakthrough_score_floor: 0.8,
            confidence_slope: 5.0,
            base_confidence: 0.3,
            max_confidence: 0.9,
            eta_padding_minutes: 10.0,
        }
    }
}

/// Bounds on the rolling state kept per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum score samples retained for trajectory estimation.
    pub max_score_samples: usize,
    /// Maximum transcript turns handed to the assessment provider.
    pub max_transcript_turns: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_score_samples: 500,
            max_transcript_turns: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_policy() {
        let config = MonitorConfig::default();

        assert!((config.aggregator.deadband - 0.05).abs() < f64::EPSILON);
        assert!((config.aggregator.fluctuation_delta - 0.1).abs() < f64::EPSILON);
        assert!((config.detector.high_score_threshold - 0.7).abs() < f64::EPSILON);
        assert!((config.alerts.breakthrough_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.alerts.debounce_seconds, 10);
        assert!((config.trajectory.eta_padding_minutes - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.trajectory.variance_window, 3);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml = r#"
            [alerts]
            breakthrough_threshold = 0.9

            [detector]
            high_score_threshold = 0.75
        "#;
        let config: MonitorConfig = toml::from_str(toml).unwrap();

        assert!((config.alerts.breakthrough_threshold - 0.9).abs() < f64::EPSILON);
        assert!((config.detector.high_score_threshold - 0.75).abs() < f64::EPSILON);
        // Untouched sections keep defaults
        assert_eq!(config.alerts.debounce_seconds, 10);
        assert!((config.aggregator.deadband - 0.05).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[trajectory]\neta_padding_minutes = 5.0\n").unwrap();

        let config = MonitorConfig::load(&path).unwrap();
        assert!((config.trajectory.eta_padding_minutes - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = MonitorConfig::load("/nonexistent/monitor.toml").unwrap_err();
        assert!(matches!(err, MonitorError::Io(_)));
    }

    #[test]
    fn test_load_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();

        let err = MonitorConfig::load(&path).unwrap_err();
        assert!(matches!(err, MonitorError::Config(_)));
    }
}
