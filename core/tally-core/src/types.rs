//! Data model shared by the core, the daemon and its clients.
//!
//! Projects and sessions are owned by the session store; the core treats
//! them as reference data and only ever mutates sessions through the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Projects
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Paused,
    Completed,
    Archived,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Archived => "archived",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ProjectStatus::Active),
            "paused" => Some(ProjectStatus::Paused),
            "completed" => Some(ProjectStatus::Completed),
            "archived" => Some(ProjectStatus::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>, status: ProjectStatus) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: None,
            status,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════════

/// A timed interval of work attributed to one project.
///
/// `end_time == None` means the session is still running; `is_running` mirrors
/// that for cheap filtering. `duration_seconds` is authoritative once the
/// session is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSession {
    pub id: String,
    pub project_id: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    pub is_running: bool,
}

impl TimeSession {
    pub fn open(id: String, project_id: String, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id,
            start_time,
            end_time: None,
            duration_seconds: None,
            notes: None,
            is_running: true,
        }
    }

    /// Closes the session at `end_time`. Duration is clamped to zero so a
    /// clock that stepped backwards never yields negative work.
    pub fn close(&mut self, end_time: DateTime<Utc>, notes: Option<String>) {
        let elapsed = end_time
            .signed_duration_since(self.start_time)
            .num_seconds();
        self.end_time = Some(end_time);
        self.duration_seconds = Some(elapsed.max(0));
        if notes.is_some() {
            self.notes = notes;
        }
        self.is_running = false;
    }

    /// Seconds elapsed so far, measured against `now` while running.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> i64 {
        match self.duration_seconds {
            Some(duration) if !self.is_running => duration,
            _ => now.signed_duration_since(self.start_time).num_seconds().max(0),
        }
    }
}

/// Aggregate of closed sessions for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStats {
    pub project_id: String,
    pub total_seconds: i64,
    pub total_hours: f64,
    pub session_count: u32,
}

impl ProjectStats {
    pub fn empty(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            total_seconds: 0,
            total_hours: 0.0,
            session_count: 0,
        }
    }
}
