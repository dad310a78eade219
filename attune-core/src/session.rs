//! Per-session mutable state and the end-of-session summary.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::assessment::TurnMessage;
use crate::config::HistoryConfig;
use crate::event::MonitoringEvent;
use crate::ids::{ParticipantId, SessionId};
use crate::metrics::LiveMetrics;
use crate::trajectory::ScoreHistory;

/// Everything the pipeline tracks for one active session.
///
/// Mutated only while the owning per-session lock is held; the turn
/// pipeline computes a full replacement [`LiveMetrics`] and swaps it in
/// whole, so readers never observe a half-applied turn.
#[derive(Debug)]
pub struct SessionState {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub started_at: DateTime<Utc>,
    pub metrics: LiveMetrics,
    /// Append-only, time-ordered event history.
    pub events: Vec<MonitoringEvent>,
    /// Every alert raised for the session, resolved ones included.
    pub alerts: Vec<Alert>,
    /// Rolling composite-score history for trajectory prediction.
    pub score_history: ScoreHistory,
    /// Environment context supplied at session start, forwarded to the
    /// provider when a turn carries none of its own.
    pub env_context: Option<serde_json::Value>,
    /// Bounded conversation transcript handed to the provider.
    transcript: VecDeque<TurnMessage>,
    max_transcript_turns: usize,
}

impl SessionState {
    /// Create a fresh session with baseline metrics.
    #[must_use]
    pub fn new(
        session_id: SessionId,
        participant_id: ParticipantId,
        history: &HistoryConfig,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            participant_id,
            started_at,
            metrics: LiveMetrics::initial(),
            events: Vec::new(),
            alerts: Vec::new(),
            score_history: ScoreHistory::new(history.max_score_samples),
            env_context: None,
            transcript: VecDeque::new(),
            max_transcript_turns: history.max_transcript_turns,
        }
    }

    /// Minutes since the session started. Never negative.
    #[must_use]
    pub fn elapsed_minutes(&self, now: DateTime<Utc>) -> f64 {
        let millis = now.signed_duration_since(self.started_at).num_milliseconds();
        (millis.max(0) as f64) / 60_000.0
    }

    /// Transcript as a contiguous vec, oldest first.
    #[must_use]
    pub fn transcript_vec(&self) -> Vec<TurnMessage> {
        self.transcript.iter().cloned().collect()
    }

    /// Append a turn's two messages, evicting the oldest past the cap.
    pub fn push_turn(&mut self, user: TurnMessage, assistant: TurnMessage) {
        self.transcript.push_back(user);
        self.transcript.push_back(assistant);
        while self.transcript.len() > self.max_transcript_turns * 2 {
            self.transcript.pop_front();
        }
    }

    /// Events within `window` of `now`, oldest first.
    #[must_use]
    pub fn events_within(
        &self,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Vec<MonitoringEvent> {
        self.events
            .iter()
            .filter(|event| event.is_within(window, now))
            .cloned()
            .collect()
    }

    /// Build the summary returned when the session ends.
    #[must_use]
    pub fn summarize(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            participant_id: self.participant_id.clone(),
            duration_minutes: self.elapsed_minutes(now),
            peak_score: self.score_history.peak(),
            event_count: self.events.len(),
            alert_count: self.alerts.len(),
            final_metrics: self.metrics.clone(),
        }
    }
}

/// Closing snapshot handed back by `end_session`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub duration_minutes: f64,
    /// Highest composite score observed across the whole session.
    pub peak_score: f64,
    pub event_count: usize,
    pub alert_count: usize,
    pub final_metrics: LiveMetrics,
}
