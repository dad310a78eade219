//! Assessment provider interface and the types it produces.
//!
//! The pipeline does not score conversation text itself. An external
//! [`AssessmentProvider`] turns one conversational turn (plus history)
//! into a [`CompositeAssessment`]; everything downstream only folds that
//! structured result into session state. The provider call may be
//! I/O-bound (a model or network call) and is the only suspension point
//! in a turn.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ParticipantId, SessionId};
use crate::trajectory::{Prediction, PredictionLabel};

/// Who authored a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One message of the conversation history handed to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMessage {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl TurnMessage {
    /// Create a new transcript message.
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp,
        }
    }
}

/// A named sub-pattern the provider detected in a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubPattern {
    /// Provider-defined pattern name.
    pub name: String,
    /// Detection confidence (0.0 to 1.0).
    pub confidence: f64,
}

impl SubPattern {
    /// Create a new sub-pattern, clamping confidence to [0, 1].
    #[must_use]
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// The provider's forward prediction for the session, if it offers one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// Estimated minutes until the next significant transition.
    pub eta_minutes: f64,
    /// Confidence in the forecast (0.0 to 1.0).
    pub confidence: f64,
    /// What kind of transition is expected.
    pub label: PredictionLabel,
}

impl Forecast {
    /// Create a new forecast, clamping confidence to [0, 1].
    #[must_use]
    pub fn new(eta_minutes: f64, confidence: f64, label: PredictionLabel) -> Self {
        Self {
            eta_minutes,
            confidence: confidence.clamp(0.0, 1.0),
            label,
        }
    }
}

impl From<Forecast> for Prediction {
    fn from(f: Forecast) -> Self {
        Prediction {
            eta_minutes: f.eta_minutes,
            confidence: f.confidence,
            label: f.label,
        }
    }
}

/// Structured composite score for one conversational turn.
///
/// Sub-scores the provider omits fall back to the session's previous
/// values field by field; the fallback policy lives in
/// [`crate::metrics::SecondaryScores::fold`], not at call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeAssessment {
    /// Overall composite confidence (0.0 to 1.0). Becomes the session's
    /// new score level.
    pub overall_confidence: f64,
    /// Sub-patterns detected in this turn.
    #[serde(default)]
    pub patterns: Vec<SubPattern>,
    /// Coherence of the conversational field (0.0 to 1.0).
    pub field_coherence: Option<f64>,
    /// Depth of the participant's engagement (0.0 to 1.0).
    pub depth: Option<f64>,
    /// Human-AI integration measure (0.0 to 1.0). Enters the unified
    /// strength derivation; defaults to 0.0 when omitted.
    pub integration: Option<f64>,
    /// Direct indicator strength, when the provider supplies it.
    pub indicator_strength: Option<f64>,
    /// Direct unified strength, when the provider supplies it.
    pub unified_strength: Option<f64>,
    /// Forward prediction, when the provider offers one.
    pub forecast: Option<Forecast>,
}

impl CompositeAssessment {
    /// Create an assessment with only the overall confidence set,
    /// clamped to [0, 1].
    #[must_use]
    pub fn new(overall_confidence: f64) -> Self {
        Self {
            overall_confidence: overall_confidence.clamp(0.0, 1.0),
            patterns: Vec::new(),
            field_coherence: None,
            depth: None,
            integration: None,
            indicator_strength: None,
            unified_strength: None,
            forecast: None,
        }
    }

    /// Add detected sub-patterns.
    #[must_use]
    pub fn with_patterns(mut self, patterns: Vec<SubPattern>) -> Self {
        self.patterns = patterns;
        self
    }

    /// Set the field coherence score.
    #[must_use]
    pub fn with_field_coherence(mut self, coherence: f64) -> Self {
        self.field_coherence = Some(coherence.clamp(0.0, 1.0));
        self
    }

    /// Set the depth score.
    #[must_use]
    pub fn with_depth(mut self, depth: f64) -> Self {
        self.depth = Some(depth.clamp(0.0, 1.0));
        self
    }

    /// Set the integration score.
    #[must_use]
    pub fn with_integration(mut self, integration: f64) -> Self {
        self.integration = Some(integration.clamp(0.0, 1.0));
        self
    }

    /// Set the indicator strength directly.
    #[must_use]
    pub fn with_indicator_strength(mut self, strength: f64) -> Self {
        self.indicator_strength = Some(strength.clamp(0.0, 1.0));
        self
    }

    /// Set the unified strength directly.
    #[must_use]
    pub fn with_unified_strength(mut self, strength: f64) -> Self {
        self.unified_strength = Some(strength.clamp(0.0, 1.0));
        self
    }

    /// Attach a forward forecast.
    #[must_use]
    pub fn with_forecast(mut self, forecast: Forecast) -> Self {
        self.forecast = Some(forecast);
        self
    }
}

/// Error type for assessment provider failures.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider backend could not produce an assessment.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// The provider did not answer within the caller's deadline.
    #[error("provider timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// External assessment provider.
///
/// Implementations may call out to a model or service; the pipeline
/// treats any error as a failed turn and leaves session state untouched.
/// Timeouts are the caller's responsibility.
#[async_trait]
pub trait AssessmentProvider: Send + Sync {
    /// Assess one conversational turn in the context of the session.
    async fn assess(
        &self,
        participant_id: &ParticipantId,
        session_id: &SessionId,
        user_text: &str,
        response_text: &str,
        history: &[TurnMessage],
        env_context: Option<&serde_json::Value>,
    ) -> Result<CompositeAssessment, ProviderError>;
}

/// Provider that replays a queue of canned results.
///
/// Used by tests and the CLI replay command; the queue holds either
/// assessments or injected failures, consumed in order. An exhausted
/// queue reports `Unavailable`.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<CompositeAssessment, ProviderError>>>,
}

impl ScriptedProvider {
    /// Create an empty scripted provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an assessment to return on a future call.
    pub fn push(&self, assessment: CompositeAssessment) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(assessment));
    }

    /// Queue a failure to return on a future call.
    pub fn push_failure(&self, error: ProviderError) {
        self.script
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(error));
    }

    /// Number of queued results not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock poisoned").len()
    }
}

impl std::fmt::Debug for ScriptedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedProvider")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[async_trait]
impl AssessmentProvider for ScriptedProvider {
    async fn assess(
        &self,
        _participant_id: &ParticipantId,
        _session_id: &SessionId,
        _user_text: &str,
        _response_text: &str,
        _history: &[TurnMessage],
        _env_context: Option<&serde_json::Value>,
    ) -> Result<CompositeAssessment, ProviderError> {
        self.script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Unavailable("script exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_pattern_clamps_confidence() {
        let p = SubPattern::new("meta_awareness", 1.5);
        assert!((p.confidence - 1.0).abs() < f64::EPSILON);

        let p = SubPattern::new("meta_awareness", -0.2);
        assert!((p.confidence - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_assessment_builder() {
        let assessment = CompositeAssessment::new(0.85)
            .with_patterns(vec![SubPattern::new("deep_presence", 0.9)])
            .with_field_coherence(0.7)
            .with_depth(0.6)
            .with_integration(0.5)
            .with_forecast(Forecast::new(8.0, 0.75, PredictionLabel::Ascending));

        assert!((assessment.overall_confidence - 0.85).abs() < f64::EPSILON);
        assert_eq!(assessment.patterns.len(), 1);
        assert_eq!(assessment.field_coherence, Some(0.7));
        assert!(assessment.forecast.is_some());
        assert!(assessment.unified_strength.is_none());
    }

    #[test]
    fn test_assessment_clamps_overall_confidence() {
        let assessment = CompositeAssessment::new(2.0);
        assert!((assessment.overall_confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_assessment_serialization_roundtrip() {
        let assessment = CompositeAssessment::new(0.5)
            .with_patterns(vec![SubPattern::new("breath_awareness", 0.65)])
            .with_field_coherence(0.4);

        let json = serde_json::to_string(&assessment).expect("should serialize");
        let parsed: CompositeAssessment =
            serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(parsed, assessment);
    }

    #[tokio::test]
    async fn test_scripted_provider_replays_in_order() {
        let provider = ScriptedProvider::new();
        provider.push(CompositeAssessment::new(0.3));
        provider.push(CompositeAssessment::new(0.6));
        assert_eq!(provider.remaining(), 2);

        let participant = ParticipantId::new("u1");
        let session = SessionId::new("s1");

        let first = provider
            .assess(&participant, &session, "hi", "hello", &[], None)
            .await
            .unwrap();
        assert!((first.overall_confidence - 0.3).abs() < f64::EPSILON);

        let second = provider
            .assess(&participant, &session, "more", "sure", &[], None)
            .await
            .unwrap();
        assert!((second.overall_confidence - 0.6).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_scripted_provider_exhausted_is_unavailable() {
        let provider = ScriptedProvider::new();
        let participant = ParticipantId::new("u1");
        let session = SessionId::new("s1");

        let err = provider
            .assess(&participant, &session, "hi", "hello", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_scripted_provider_injected_failure() {
        let provider = ScriptedProvider::new();
        provider.push_failure(ProviderError::Unavailable("backend down".into()));

        let participant = ParticipantId::new("u1");
        let session = SessionId::new("s1");

        let err = provider
            .assess(&participant, &session, "hi", "hello", &[], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("backend down"));
    }
}
