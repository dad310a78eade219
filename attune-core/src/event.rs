//! Monitoring events and the rules that detect them.
//!
//! Events are immutable, timestamped records of a detected condition.
//! Each kind carries a typed payload validated at construction; there is
//! no free-form data field. The [`EventDetector`] compares the previous
//! and next metrics snapshots against the thresholds in
//! [`DetectorConfig`] and emits zero or more events per turn, in rule
//! order.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::{CompositeAssessment, SubPattern};
use crate::config::DetectorConfig;
use crate::ids::{EventId, SessionId};
use crate::metrics::LiveMetrics;
use crate::trajectory::Prediction;

/// How significant a detected condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// String form used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a detected pattern event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    /// The synthetic event emitted when a session starts.
    SessionStart,
    /// Sub-patterns reported by the assessment provider.
    Assessment,
}

/// What was detected, with a typed payload per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// One or more named patterns surfaced.
    PatternDetected {
        source: PatternSource,
        patterns: Vec<SubPattern>,
    },
    /// The composite score crossed a fixed threshold.
    ThresholdExceeded { threshold: f64, level: f64 },
    /// Field coherence moved sharply between turns.
    TrendShift {
        previous: f64,
        current: f64,
        shift: f64,
    },
    /// The provider forecast a near-future transition with high confidence.
    Prediction { forecast: Prediction },
}

impl EventKind {
    /// Stable string name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PatternDetected { .. } => "pattern_detected",
            Self::ThresholdExceeded { .. } => "threshold_exceeded",
            Self::TrendShift { .. } => "trend_shift",
            Self::Prediction { .. } => "prediction",
        }
    }
}

/// Immutable record of a detected condition in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringEvent {
    /// Time-ordered unique event ID.
    pub id: EventId,
    /// When the condition was detected.
    pub timestamp: DateTime<Utc>,
    /// Session the event belongs to.
    pub session_id: SessionId,
    /// What was detected.
    pub kind: EventKind,
    /// How significant the detection is.
    pub severity: Severity,
}

impl MonitoringEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        kind: EventKind,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            session_id,
            kind,
            severity,
        }
    }

    /// Whether this is a threshold-exceeded event.
    #[must_use]
    pub fn is_threshold_exceeded(&self) -> bool {
        matches!(self.kind, EventKind::ThresholdExceeded { .. })
    }

    /// Whether the event falls within `window` of `now`.
    #[must_use]
    pub fn is_within(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) <= window
    }
}

/// Applies the event detection rules to each metrics transition.
///
/// Rules are independent; more than one may fire per turn. The emitted
/// order matches the rule order below.
#[derive(Debug, Clone, Default)]
pub struct EventDetector {
    config: DetectorConfig,
}

impl EventDetector {
    /// Create a detector with the given thresholds.
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Compare the previous and next metrics snapshots and emit events.
    ///
    /// 1. High score: next score and assessment confidence both above
    ///    the high-score bars.
    /// 2. Pattern emergence: only when at least one sub-pattern clears
    ///    the critical bar; the payload carries every pattern above the
    ///    floor.
    /// 3. Coherence shift: coherence moved more than the shift
    ///    threshold between snapshots.
    /// 4. Forecast: the provider's forward prediction is confident
    ///    enough to surface.
    #[must_use]
    pub fn detect(
        &self,
        old: &LiveMetrics,
        new: &LiveMetrics,
        assessment: &CompositeAssessment,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Vec<MonitoringEvent> {
        let cfg = &self.config;
        let mut events = Vec::new();

        // Rule 1: high-score threshold.
        if new.score_level > cfg.high_score_threshold
            && assessment.overall_confidence > cfg.high_score_confidence
        {
            events.push(MonitoringEvent::new(
                session_id.clone(),
                EventKind::ThresholdExceeded {
                    threshold: cfg.high_score_threshold,
                    level: new.score_level,
                },
                Severity::High,
                now,
            ));
        }

        // Rule 2: pattern emergence. Gated on one pattern clearing the
        // critical bar; everything above the floor rides along.
        let strong: Vec<SubPattern> = assessment
            .patterns
            .iter()
            .filter(|p| p.confidence > cfg.pattern_confidence_floor)
            .cloned()
            .collect();
        if strong
            .iter()
            .any(|p| p.confidence > cfg.pattern_critical_confidence)
        {
            events.push(MonitoringEvent::new(
                session_id.clone(),
                EventKind::PatternDetected {
                    source: PatternSource::Assessment,
                    patterns: strong,
                },
                Severity::Critical,
                now,
            ));
        }

        // Rule 3: coherence shift.
        let previous = old.secondary.field_coherence;
        let current = new.secondary.field_coherence;
        let shift = current - previous;
        if shift.abs() > cfg.coherence_shift_threshold {
            let severity = if shift.abs() > cfg.coherence_shift_high {
                Severity::High
            } else {
                Severity::Medium
            };
            events.push(MonitoringEvent::new(
                session_id.clone(),
                EventKind::TrendShift {
                    previous,
                    current,
                    shift,
                },
                severity,
                now,
            ));
        }

        // Rule 4: confident provider forecast.
        if let Some(forecast) = &assessment.forecast
            && forecast.confidence > cfg.forecast_confidence_floor
        {
            let severity = if forecast.confidence > cfg.forecast_high_confidence {
                Severity::High
            } else {
                Severity::Medium
            };
            events.push(MonitoringEvent::new(
                session_id.clone(),
                EventKind::Prediction {
                    forecast: forecast.clone().into(),
                },
                severity,
                now,
            ));
        }

        events
    }
}
