//! The session registry: lifecycle, the turn pipeline, and the read
//! and subscription surface.
//!
//! Construction is explicit; callers inject the assessment provider and
//! configuration. There is no process-global registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::alert::{Alert, AlertManager};
use crate::assessment::{AssessmentProvider, Role, TurnMessage};
use crate::bus::{ListenerError, ListenerId, SubscriptionBus};
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{EventDetector, EventKind, MonitoringEvent, PatternSource, Severity};
use crate::ids::{ParticipantId, SessionId};
use crate::metrics::{LiveMetrics, MetricsAggregator};
use crate::session::{SessionState, SessionSummary};
use crate::trajectory::{Prediction, TrajectoryEstimator};

/// Owns every active session and drives the monitoring pipeline.
///
/// Sessions live behind a `RwLock<HashMap>`; each session carries its
/// own `Mutex` so turns for one session serialize while other sessions
/// proceed concurrently. The provider call is the pipeline's only
/// suspension point and happens before any mutation, so a failed
/// assessment leaves the session exactly as it was.
pub struct SessionRegistry {
    provider: Arc<dyn AssessmentProvider>,
    aggregator: MetricsAggregator,
    detector: EventDetector,
    alerts: AlertManager,
    estimator: TrajectoryEstimator,
    bus: SubscriptionBus,
    config: MonitorConfig,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionState>>>>,
}

impl SessionRegistry {
    /// Create a registry driving turns through `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn AssessmentProvider>, config: MonitorConfig) -> Self {
        Self {
            provider,
            aggregator: MetricsAggregator::new(config.aggregator.clone()),
            detector: EventDetector::new(config.detector.clone()),
            alerts: AlertManager::new(config.alerts.clone()),
            estimator: TrajectoryEstimator::new(config.trajectory.clone()),
            bus: SubscriptionBus::new(),
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Begin monitoring a session and return its baseline metrics.
    ///
    /// Emits a medium-severity `pattern_detected` event marking the
    /// session start. Fails with `AlreadyActive` if the ID is in use.
    pub async fn start_session(
        &self,
        session_id: SessionId,
        participant_id: ParticipantId,
        initial_context: Option<serde_json::Value>,
    ) -> Result<LiveMetrics> {
        let now = Utc::now();
        let mut state = SessionState::new(
            session_id.clone(),
            participant_id.clone(),
            &self.config.history,
            now,
        );
        state.env_context = initial_context;

        let start_event = MonitoringEvent::new(
            session_id.clone(),
            EventKind::PatternDetected {
                source: PatternSource::SessionStart,
                patterns: Vec::new(),
            },
            Severity::Medium,
            now,
        );
        state.events.push(start_event.clone());
        state.metrics.recent_events = vec![start_event.clone()];
        let metrics = state.metrics.clone();

        {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&session_id) {
                return Err(MonitorError::AlreadyActive(session_id.to_string()));
            }
            sessions.insert(session_id.clone(), Arc::new(Mutex::new(state)));
        }

        self.bus.publish_event(&session_id, &start_event);
        info!(session_id = %session_id, participant_id = %participant_id, "session monitoring started");
        Ok(metrics)
    }

    /// Run one conversational turn through the pipeline.
    ///
    /// Assess, aggregate, detect, alert, commit, publish, in that order.
    /// The metrics swap is whole-value; readers see either the previous
    /// snapshot or the complete new one. Returns the fresh snapshot.
    pub async fn process_turn(
        &self,
        session_id: &SessionId,
        user_text: &str,
        response_text: &str,
        env_context: Option<&serde_json::Value>,
    ) -> Result<LiveMetrics> {
        let session = self.session_handle(session_id).await?;
        let mut state = session.lock().await;

        let now = Utc::now();
        let elapsed = state.elapsed_minutes(now);
        let transcript = state.transcript_vec();

        // Per-turn context wins over the context given at session start.
        let context = env_context.or(state.env_context.as_ref());

        // The only await on an external boundary; on error nothing below
        // runs and the session is untouched.
        let assessment = self
            .provider
            .assess(
                &state.participant_id,
                session_id,
                user_text,
                response_text,
                &transcript,
                context,
            )
            .await
            .inspect_err(|err| {
                warn!(session_id = %session_id, %err, "assessment failed; turn discarded");
            })?;

        let old = state.metrics.clone();
        let lookback = state.events_within(self.aggregator.fluctuation_lookback(), now);
        let mut next = self
            .aggregator
            .update(&old, &assessment, elapsed, &lookback, now);

        state.score_history.push(now, next.score_level);
        next.next_prediction = match &assessment.forecast {
            Some(forecast) => Prediction::from(forecast.clone()),
            None => self.estimator.predict(&state.score_history, elapsed),
        };

        let events = self
            .detector
            .detect(&old, &next, &assessment, session_id, now);
        state.events.extend(events.iter().cloned());

        let new_alerts = self
            .alerts
            .evaluate(session_id, &next, elapsed, &state.alerts, now);
        state.alerts.extend(new_alerts.iter().cloned());

        next.recent_events = state.events_within(self.aggregator.recent_window(), now);
        state.metrics = next.clone();
        state.push_turn(
            TurnMessage::new(Role::User, user_text, now),
            TurnMessage::new(Role::Assistant, response_text, now),
        );

        debug!(
            session_id = %session_id,
            score = next.score_level,
            trajectory = next.trajectory.as_str(),
            events = events.len(),
            alerts = new_alerts.len(),
            "turn committed"
        );

        // Published under the session lock so delivery order matches
        // history order for this session.
        for event in &events {
            self.bus.publish_event(session_id, event);
        }
        for alert in &new_alerts {
            self.bus.publish_alert(session_id, alert);
        }

        Ok(next)
    }

    /// Stop monitoring a session and return its closing summary.
    ///
    /// Waits for an in-flight turn to finish, then evicts the session
    /// and every subscription registered for it.
    pub async fn end_session(&self, session_id: &SessionId) -> Result<SessionSummary> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(session_id)
                .ok_or_else(|| MonitorError::NotFound(session_id.to_string()))?
        };

        let state = session.lock().await;
        let summary = state.summarize(Utc::now());
        self.bus.remove_session(session_id);

        info!(
            session_id = %session_id,
            duration_minutes = summary.duration_minutes,
            peak_score = summary.peak_score,
            "session monitoring ended"
        );
        Ok(summary)
    }

    /// Current metrics snapshot, or `None` if the session is not active.
    /// The one read that never fails; pollers need no error branch.
    pub async fn get_metrics(&self, session_id: &SessionId) -> Option<LiveMetrics> {
        let session = self.sessions.read().await.get(session_id).cloned()?;
        let state = session.lock().await;
        Some(state.metrics.clone())
    }

    /// Full event history for an active session, oldest first.
    pub async fn get_events(&self, session_id: &SessionId) -> Result<Vec<MonitoringEvent>> {
        let session = self.session_handle(session_id).await?;
        let state = session.lock().await;
        Ok(state.events.clone())
    }

    /// Every alert raised for an active session, resolved ones included.
    pub async fn get_alerts(&self, session_id: &SessionId) -> Result<Vec<Alert>> {
        let session = self.session_handle(session_id).await?;
        let state = session.lock().await;
        Ok(state.alerts.clone())
    }

    /// Mark an alert resolved. Idempotent for already-resolved alerts;
    /// fails with `NotFound` if no alert has the given ID.
    pub async fn resolve_alert(&self, session_id: &SessionId, alert_id: &str) -> Result<()> {
        let session = self.session_handle(session_id).await?;
        let mut state = session.lock().await;
        let alert = state
            .alerts
            .iter_mut()
            .find(|alert| alert.id == alert_id)
            .ok_or_else(|| MonitorError::NotFound(alert_id.to_string()))?;
        alert.resolved = true;
        debug!(session_id = %session_id, alert_id, "alert resolved");
        Ok(())
    }

    /// Register an event listener for an active session.
    pub async fn subscribe_events<F>(&self, session_id: &SessionId, listener: F) -> Result<ListenerId>
    where
        F: Fn(&MonitoringEvent) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.ensure_active(session_id).await?;
        Ok(self.bus.subscribe_events(session_id.clone(), listener))
    }

    /// Register an alert listener for an active session.
    pub async fn subscribe_alerts<F>(&self, session_id: &SessionId, listener: F) -> Result<ListenerId>
    where
        F: Fn(&Alert) -> std::result::Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.ensure_active(session_id).await?;
        Ok(self.bus.subscribe_alerts(session_id.clone(), listener))
    }

    /// Remove a single event listener. Returns whether it existed.
    pub fn unsubscribe_events(&self, session_id: &SessionId, id: ListenerId) -> bool {
        self.bus.unsubscribe_events(session_id, id)
    }

    /// Remove a single alert listener. Returns whether it existed.
    pub fn unsubscribe_alerts(&self, session_id: &SessionId, id: ListenerId) -> bool {
        self.bus.unsubscribe_alerts(session_id, id)
    }

    /// IDs of every active session.
    pub async fn list_sessions(&self) -> Vec<SessionId> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Number of active sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session_handle(&self, session_id: &SessionId) -> Result<Arc<Mutex<SessionState>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| MonitorError::NotFound(session_id.to_string()))
    }

    async fn ensure_active(&self, session_id: &SessionId) -> Result<()> {
        if self.sessions.read().await.contains_key(session_id) {
            Ok(())
        } else {
            Err(MonitorError::NotFound(session_id.to_string()))
        }
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry").finish_non_exhaustive()
    }
}
