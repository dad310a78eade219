//! Real-time monitoring pipeline for live conversation sessions.
//!
//! Each active session carries a metrics snapshot that a pluggable
//! [`AssessmentProvider`] refreshes turn by turn. Every turn runs the
//! same pipeline: assess, aggregate into [`LiveMetrics`], detect
//! [`MonitoringEvent`]s, evaluate [`Alert`] rules, commit, then fan the
//! results out to per-session subscribers.
//!
//! The entry point is [`SessionRegistry`]; construct one with a
//! provider and a [`MonitorConfig`] and drive it with
//! `start_session` / `process_turn` / `end_session`.

pub mod alert;
pub mod assessment;
pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod trajectory;

pub use alert::{Alert, AlertKind, AlertManager, AlertSeverity};
pub use assessment::{
    AssessmentProvider, CompositeAssessment, Forecast, ProviderError, Role, ScriptedProvider,
    SubPattern, TurnMessage,
};
pub use bus::{ListenerError, ListenerId, SubscriptionBus};
pub use config::{
    AggregatorConfig, AlertConfig, DetectorConfig, HistoryConfig, MonitorConfig, TrajectoryConfig,
};
pub use error::{MonitorError, Result};
pub use event::{EventDetector, EventKind, MonitoringEvent, PatternSource, Severity};
pub use ids::{EventId, ParticipantId, SessionId};
pub use metrics::{LiveMetrics, MetricsAggregator, SecondaryScores, Trajectory};
pub use registry::SessionRegistry;
pub use session::{SessionState, SessionSummary};
pub use trajectory::{
    Prediction, PredictionLabel, ScoreHistory, ScoreSample, TrajectoryEstimator,
};
