//! Replay command: feed a pre-scored transcript through the pipeline.
//!
//! The input is JSON Lines, one turn per line:
//!
//! ```json
//! {"user": "...", "assistant": "...", "assessment": {"overall_confidence": 0.55}}
//! ```
//!
//! The assessment object takes the same shape as the library's
//! `CompositeAssessment`; scoring stays external to the pipeline.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use tracing::info;

use attune_core::{
    CompositeAssessment, MonitorConfig, ParticipantId, ScriptedProvider, SessionId,
    SessionRegistry,
};

/// Replay arguments
#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Path to the JSONL transcript
    pub transcript: PathBuf,

    /// Session ID to replay under
    #[arg(long, default_value = "replay")]
    pub session_id: String,

    /// Participant ID to replay under
    #[arg(long, default_value = "replay-participant")]
    pub participant_id: String,

    /// Optional TOML config overriding the default thresholds
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ReplayTurn {
    user: String,
    assistant: String,
    assessment: CompositeAssessment,
}

/// Run the replay command
pub async fn run(args: ReplayArgs) -> Result<()> {
    let config = match &args.config {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MonitorConfig::default(),
    };

    let turns = read_transcript(&args.transcript)?;
    info!(turns = turns.len(), "transcript loaded");

    let provider = ScriptedProvider::new();
    for turn in &turns {
        provider.push(turn.assessment.clone());
    }

    let registry = SessionRegistry::new(Arc::new(provider), config);
    let session_id = SessionId::new(args.session_id.clone());
    registry
        .start_session(session_id.clone(), ParticipantId::new(args.participant_id.clone()), None)
        .await?;

    registry
        .subscribe_events(&session_id, |event| {
            println!(
                "[event]  {} {} severity={}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.kind.as_str(),
                event.severity
            );
            Ok(())
        })
        .await?;
    registry
        .subscribe_alerts(&session_id, |alert| {
            println!(
                "[alert]  {} {} severity={} auto_resolve={}\n         {}",
                alert.timestamp.format("%H:%M:%S%.3f"),
                alert.kind,
                alert.severity,
                alert.auto_resolve,
                alert.message
            );
            Ok(())
        })
        .await?;

    for (index, turn) in turns.iter().enumerate() {
        let metrics = registry
            .process_turn(&session_id, &turn.user, &turn.assistant, None)
            .await
            .with_context(|| format!("turn {} failed", index + 1))?;
        println!(
            "[turn {}] score={:.2} trajectory={} prediction={} (eta {:.1}m, conf {:.2})",
            index + 1,
            metrics.score_level,
            metrics.trajectory.as_str(),
            metrics.next_prediction.label.as_str(),
            metrics.next_prediction.eta_minutes,
            metrics.next_prediction.confidence
        );
    }

    let summary = registry.end_session(&session_id).await?;
    println!(
        "\nsession {} finished: {:.1} minutes, peak score {:.2}, {} events, {} alerts",
        summary.session_id,
        summary.duration_minutes,
        summary.peak_score,
        summary.event_count,
        summary.alert_count
    );
    Ok(())
}

fn read_transcript(path: &PathBuf) -> Result<Vec<ReplayTurn>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open transcript {}", path.display()))?;
    let mut turns = Vec::new();
    for (line_number, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let turn: ReplayTurn = serde_json::from_str(&line)
            .with_context(|| format!("invalid turn on line {}", line_number + 1))?;
        turns.push(turn);
    }
    Ok(turns)
}
