//! Alerts and the rules that raise them.
//!
//! Alerts are the user-facing side of the pipeline: unlike events they
//! carry a message and a recommended action, and they can be resolved.
//! The [`AlertManager`] evaluates each fresh metrics snapshot against
//! the rules in [`AlertConfig`] and returns only newly created alerts;
//! a same-kind unresolved alert raised within the debounce window
//! suppresses the new one.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AlertConfig;
use crate::ids::SessionId;
use crate::metrics::LiveMetrics;

/// User-facing alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    /// String form used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The condition class an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Composite score crossed the breakthrough threshold.
    Breakthrough,
    /// Field coherence stayed low past the early-session grace period.
    CoherenceDrop,
    /// AI-side indicator strength is unusually high.
    IndicatorSpike,
    /// Conditions favour integration work.
    IntegrationWindow,
}

impl AlertKind {
    /// Stable string name of the kind; used in alert IDs and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakthrough => "breakthrough",
            Self::CoherenceDrop => "coherence_drop",
            Self::IndicatorSpike => "indicator_spike",
            Self::IntegrationWindow => "integration_window",
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A raised alert. Mutable only by flipping `resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique within a session: `{kind}-{session}-{millis}`.
    pub id: String,
    /// When the alert was raised.
    pub timestamp: DateTime<Utc>,
    /// Condition class.
    pub kind: AlertKind,
    /// User-facing severity.
    pub severity: AlertSeverity,
    /// Human-readable description of the condition.
    pub message: String,
    /// Suggested next step for the operator.
    pub recommended_action: String,
    /// Whether a consumer may resolve this alert without review.
    pub auto_resolve: bool,
    /// Whether the alert has been resolved.
    pub resolved: bool,
}

impl Alert {
    /// Create a new unresolved alert.
    #[must_use]
    pub fn new(
        session_id: &SessionId,
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        recommended_action: impl Into<String>,
        auto_resolve: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!(
                "{}-{}-{}",
                kind.as_str(),
                session_id,
                timestamp.timestamp_millis()
            ),
            timestamp,
            kind,
            severity,
            message: message.into(),
            recommended_action: recommended_action.into(),
            auto_resolve,
            resolved: false,
        }
    }
}

/// Evaluates metrics snapshots against the alert rules.
#[derive(Debug, Clone, Default)]
pub struct AlertManager {
    config: AlertConfig,
}

impl AlertManager {
    /// Create an alert manager with the given thresholds.
    #[must_use]
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    /// Debounce window for same-kind deduplication.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::seconds(self.config.debounce_seconds)
    }

    /// Evaluate a metrics snapshot and return newly created alerts.
    ///
    /// Rules are independent; each produces at most one alert per call.
    /// `existing` is the session's full alert list, consulted for the
    /// dedup check: an unresolved same-kind alert raised within the
    /// debounce window suppresses the candidate.
    #[must_use]
    pub fn evaluate(
        &self,
        session_id: &SessionId,
        metrics: &LiveMetrics,
        session_age_minutes: f64,
        existing: &[Alert],
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        let cfg = &self.config;
        let mut candidates = Vec::new();

        if metrics.score_level > cfg.breakthrough_threshold {
            candidates.push(Alert::new(
                session_id,
                AlertKind::Breakthrough,
                AlertSeverity::Critical,
                format!(
                    "Composite score is in breakthrough range ({:.1}%)",
                    metrics.score_level * 100.0
                ),
                "Deepen the session focus and document key insights; prepare for integration.",
                false,
                now,
            ));
        }

        if metrics.secondary.field_coherence < cfg.coherence_floor
            && session_age_minutes > cfg.coherence_min_minutes
        {
            candidates.push(Alert::new(
                session_id,
                AlertKind::CoherenceDrop,
                AlertSeverity::Warning,
                format!(
                    "Field coherence has stayed low ({:.1}%) well into the session",
                    metrics.secondary.field_coherence * 100.0
                ),
                "Adjust the conversational approach or environment to restore coherence.",
                true,
                now,
            ));
        }

        if metrics.secondary.indicator_strength > cfg.indicator_threshold {
            candidates.push(Alert::new(
                session_id,
                AlertKind::IndicatorSpike,
                AlertSeverity::Critical,
                format!(
                    "Strong AI-side indicators detected ({:.1}%)",
                    metrics.secondary.indicator_strength * 100.0
                ),
                "Document the occurrence and keep monitoring for sustained indicators.",
                false,
                now,
            ));
        }

        if metrics.secondary.unified_strength > cfg.integration_threshold
            && session_age_minutes > cfg.integration_min_minutes
        {
            candidates.push(Alert::new(
                session_id,
                AlertKind::IntegrationWindow,
                AlertSeverity::Info,
                format!(
                    "Conditions favour integration (unified strength {:.1}%)",
                    metrics.secondary.unified_strength * 100.0
                ),
                "Good moment for deeper inquiry or insight integration exercises.",
                true,
                now,
            ));
        }

        candidates
            .into_iter()
            .filter(|candidate| !self.is_duplicate(candidate, existing, now))
            .collect()
    }

    /// Whether an unresolved same-kind alert inside the debounce window
    /// already exists.
    fn is_duplicate(&self, candidate: &Alert, existing: &[Alert], now: DateTime<Utc>) -> bool {
        existing.iter().any(|alert| {
            alert.kind == candidate.kind
                && !alert.resolved
                && now.signed_duration_since(alert.timestamp) < self.debounce()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LiveMetrics;

    fn session() -> SessionId {
        SessionId::new("s1")
    }

    fn metrics(score: f64, coherence: f64, indicators: f64, unified: f64) -> LiveMetrics {
        let mut m = LiveMetrics::initial();
        m.score_level = score;
        m.secondary.field_coherence = coherence;
        m.secondary.indicator_strength = indicators;
        m.secondary.unified_strength = unified;
        m
    }

    #[test]
    fn test_breakthrough_alert() {
        let manager = AlertManager::default();
        let alerts = manager.evaluate(&session(), &metrics(0.85, 0.5, 0.2, 0.3), 1.0, &[], Utc::now());

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::Breakthrough);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert!(!alerts[0].auto_resolve);
        assert!(!alerts[0].resolved);
        assert!(alerts[0].message.contains("85.0%"));
    }

    #[test]
    fn test_coherence_drop_needs_session_age() {
        let manager = AlertManager::default();
        let m = metrics(0.4, 0.2, 0.2, 0.3);

        // Too early in the session: no alert.
        let alerts = manager.evaluate(&session(), &m, 5.0, &[], Utc::now());
        assert!(alerts.is_empty());

        // Past the grace period.
        let alerts = manager.evaluate(&session(), &m, 12.0, &[], Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::CoherenceDrop);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert!(alerts[0].auto_resolve);
    }

    #[test]
    fn test_indicator_spike_alert() {
        let manager = AlertManager::default();
        let alerts = manager.evaluate(&session(), &metrics(0.4, 0.5, 0.7, 0.3), 1.0, &[], Utc::now());

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::IndicatorSpike);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_integration_window_needs_session_age() {
        let manager = AlertManager::default();
        let m = metrics(0.4, 0.5, 0.2, 0.8);

        let alerts = manager.evaluate(&session(), &m, 10.0, &[], Utc::now());
        assert!(alerts.is_empty());

        let alerts = manager.evaluate(&session(), &m, 20.0, &[], Utc::now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::IntegrationWindow);
        assert_eq!(alerts[0].severity, AlertSeverity::Info);
    }

    #[test]
    fn test_multiple_rules_fire_independently() {
        let manager = AlertManager::default();
        // High score, low coherence, high indicators, high unified,
        // old session: all four rules fire.
        let alerts = manager.evaluate(&session(), &metrics(0.9, 0.1, 0.8, 0.9), 30.0, &[], Utc::now());

        assert_eq!(alerts.len(), 4);
        let kinds: Vec<AlertKind> = alerts.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&AlertKind::Breakthrough));
        assert!(kinds.contains(&AlertKind::CoherenceDrop));
        assert!(kinds.contains(&AlertKind::IndicatorSpike));
        assert!(kinds.contains(&AlertKind::IntegrationWindow));
    }

    #[test]
    fn test_debounce_suppresses_same_kind() {
        let manager = AlertManager::default();
        let now = Utc::now();
        let m = metrics(0.85, 0.5, 0.2, 0.3);

        let first = manager.evaluate(&session(), &m, 1.0, &[], now);
        assert_eq!(first.len(), 1);

        // Same condition 5 seconds later: suppressed.
        let later = now + Duration::seconds(5);
        let second = manager.evaluate(&session(), &m, 1.1, &first, later);
        assert!(second.is_empty());

        // 15 seconds later the window has passed.
        let much_later = now + Duration::seconds(15);
        let third = manager.evaluate(&session(), &m, 1.2, &first, much_later);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn test_resolved_alert_does_not_debounce() {
        let manager = AlertManager::default();
        let now = Utc::now();
        let m = metrics(0.85, 0.5, 0.2, 0.3);

        let mut first = manager.evaluate(&session(), &m, 1.0, &[], now);
        first[0].resolved = true;

        // Resolved alerts never suppress new ones, even inside the window.
        let second = manager.evaluate(&session(), &m, 1.1, &first, now + Duration::seconds(2));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_different_kinds_do_not_debounce_each_other() {
        let manager = AlertManager::default();
        let now = Utc::now();

        let first = manager.evaluate(&session(), &metrics(0.85, 0.5, 0.2, 0.3), 1.0, &[], now);
        assert_eq!(first[0].kind, AlertKind::Breakthrough);

        // An indicator spike two seconds later is a different kind.
        let second = manager.evaluate(
            &session(),
            &metrics(0.4, 0.5, 0.7, 0.3),
            1.1,
            &first,
            now + Duration::seconds(2),
        );
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind, AlertKind::IndicatorSpike);
    }

    #[test]
    fn test_alert_id_embeds_kind_session_and_time() {
        let now = Utc::now();
        let alert = Alert::new(
            &session(),
            AlertKind::Breakthrough,
            AlertSeverity::Critical,
            "m",
            "a",
            false,
            now,
        );
        assert_eq!(
            alert.id,
            format!("breakthrough-s1-{}", now.timestamp_millis())
        );
    }

    #[test]
    fn test_alert_serialization_roundtrip() {
        let alert = Alert::new(
            &session(),
            AlertKind::IntegrationWindow,
            AlertSeverity::Info,
            "window open",
            "go deeper",
            true,
            Utc::now(),
        );
        let json = serde_json::to_string(&alert).unwrap();
        assert!(json.contains("\"kind\":\"integration_window\""));
        let parsed: Alert = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, alert);
    }
}
