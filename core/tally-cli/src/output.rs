//! Human-readable rendering of daemon payloads.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tally_core::tray::format_elapsed;
use tally_core::{
    EventOutcome, Project, ProjectStats, TimeSession, TimerPhase, TimerState, TraySnapshot,
};

/// Deserializes a daemon payload into the shared core type.
pub fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, String> {
    serde_json::from_value(value).map_err(|err| format!("Unexpected {} payload: {}", what, err))
}

fn countdown(seconds: u32) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

pub fn timer(state: &TimerState) -> String {
    let project = state.project_id.as_deref().unwrap_or("-");
    let status = match state.phase {
        TimerPhase::Idle if state.is_paused() => "paused",
        TimerPhase::Idle if state.has_residual_time() => "stopped (time left)",
        phase => phase.as_str(),
    };
    let mut line = format!(
        "{} | project {} | {} of {} min",
        status,
        project,
        countdown(state.seconds_remaining),
        state.planned_minutes
    );
    if let Some(session_id) = &state.session_id {
        line.push_str(&format!(" | session {}", session_id));
    }
    line
}

pub fn tray(snapshot: &TraySnapshot, pinned: &[String], dirty: bool) -> String {
    let mut lines = Vec::new();
    lines.push("Running:".to_string());
    match &snapshot.menu.placeholder {
        Some(placeholder) if snapshot.menu.running.is_empty() => {
            lines.push(format!("  {}", placeholder));
        }
        _ => {
            for item in &snapshot.menu.running {
                lines.push(format!("  {}", item.label));
            }
        }
    }

    lines.push("Start:".to_string());
    for item in &snapshot.menu.startable {
        lines.push(format!("  {} ({})", item.label, item.project_id));
    }

    let marker = if dirty { " (unsaved)" } else { "" };
    lines.push(format!("Pinned{}: {}", marker, pinned.join(", ")));
    lines.join("\n")
}

pub fn projects(projects: &[Project]) -> String {
    if projects.is_empty() {
        return "No projects".to_string();
    }
    projects
        .iter()
        .map(|p| format!("{:<12} {:<10} {}", p.id, p.status.as_str(), p.name))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn stats(stats: &[ProjectStats]) -> String {
    if stats.is_empty() {
        return "No projects".to_string();
    }
    stats
        .iter()
        .map(|s| {
            format!(
                "{:<12} {:>8.2} h  {:>4} sessions",
                s.project_id, s.total_hours, s.session_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn running(sessions: &[TimeSession], now: DateTime<Utc>) -> String {
    if sessions.is_empty() {
        return tally_core::tray::EMPTY_RUNNING_LABEL.to_string();
    }
    sessions
        .iter()
        .map(|s| {
            format!(
                "{:<12} {:<28} {}",
                s.project_id,
                s.id,
                format_elapsed(s.elapsed_seconds(now))
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn event(outcome: &EventOutcome) -> String {
    let mut lines = Vec::new();
    for session in &outcome.stopped {
        lines.push(format!("stopped {} ({})", session.id, session.project_id));
    }
    if let Some(session) = &outcome.started {
        lines.push(format!("started {} ({})", session.id, session.project_id));
    }
    lines.push(format!("timer: {}", timer(&outcome.timer)));
    lines.join("\n")
}
