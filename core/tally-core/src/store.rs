//! The session store contract and its in-process implementations.
//!
//! The store owns projects, sessions and small settings values. The timer
//! and tray only ever read or mutate them through [`SessionStore`]; the daemon
//! provides the SQLite implementation, [`MemoryStore`] serves tests and
//! embedding, and [`ObservedStore`] adds change notifications on top of either.

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::broadcast::Broadcaster;
use crate::error::StoreError;
use crate::stats;
use crate::types::{Project, ProjectStats, TimeSession};

/// Note appended to sessions force-stopped by a system suspend.
pub const AUTO_PAUSE_NOTE: &str = "[Auto-paused]";

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for projects, sessions and settings.
///
/// Implementations must keep at most one running session per project and
/// treat `delete_session` on a missing id as a no-op (`Ok(false)`).
pub trait SessionStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    /// Opens a session for `project_id`. Fails with `NotFound` for an unknown
    /// project and `AlreadyRunning` if that project already has one open.
    fn start_session(&self, project_id: &str, start: DateTime<Utc>) -> StoreResult<TimeSession>;

    /// Closes a running session. `NotFound` if it no longer exists, `Conflict`
    /// if it was already stopped.
    fn stop_session(
        &self,
        session_id: &str,
        end: DateTime<Utc>,
        notes: Option<&str>,
    ) -> StoreResult<TimeSession>;

    /// Returns whether a session was actually removed.
    fn delete_session(&self, session_id: &str) -> StoreResult<bool>;

    fn get_session(&self, session_id: &str) -> StoreResult<Option<TimeSession>>;

    fn list_running_sessions(&self) -> StoreResult<Vec<TimeSession>>;

    /// Force-stops every running session, appending `note` to its notes.
    fn stop_all_running_sessions(
        &self,
        end: DateTime<Utc>,
        note: &str,
    ) -> StoreResult<Vec<TimeSession>>;

    // ─────────────────────────────────────────────────────────────────────
    // Projects & Stats
    // ─────────────────────────────────────────────────────────────────────

    fn list_projects(&self) -> StoreResult<Vec<Project>>;

    fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>>;

    fn upsert_project(&self, project: &Project) -> StoreResult<Project>;

    fn project_stats(&self, project_id: &str) -> StoreResult<ProjectStats>;

    fn all_project_stats(&self) -> StoreResult<Vec<ProjectStats>>;

    // ─────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────

    fn load_setting(&self, key: &str) -> StoreResult<Option<String>>;

    fn save_setting(&self, key: &str, value: &str) -> StoreResult<()>;
}

/// Appends `note` to existing notes, or uses it alone.
pub fn append_note(existing: Option<&str>, note: &str) -> String {
    match existing {
        Some(existing) if !existing.trim().is_empty() => format!("{} {}", existing, note),
        _ => note.to_string(),
    }
}

pub fn new_session_id() -> String {
    ulid::Ulid::new().to_string()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Memory Store
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct MemoryInner {
    projects: Vec<Project>,
    sessions: Vec<TimeSession>,
    settings: HashMap<String, String>,
}

/// A `SessionStore` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        let store = Self::new();
        store.lock().projects.extend(projects);
        store
    }

    /// Every session ever created and not deleted, in creation order.
    pub fn all_sessions(&self) -> Vec<TimeSession> {
        self.lock().sessions.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for MemoryStore {
    fn start_session(&self, project_id: &str, start: DateTime<Utc>) -> StoreResult<TimeSession> {
        let mut inner = self.lock();
        if !inner.projects.iter().any(|p| p.id == project_id) {
            return Err(StoreError::NotFound {
                entity: "Project",
                id: project_id.to_string(),
            });
        }
        if let Some(running) = inner
            .sessions
            .iter()
            .find(|s| s.project_id == project_id && s.is_running)
        {
            return Err(StoreError::AlreadyRunning {
                project_id: project_id.to_string(),
                session_id: running.id.clone(),
            });
        }

        let session = TimeSession::open(new_session_id(), project_id.to_string(), start);
        inner.sessions.push(session.clone());
        Ok(session)
    }

    fn stop_session(
        &self,
        session_id: &str,
        end: DateTime<Utc>,
        notes: Option<&str>,
    ) -> StoreResult<TimeSession> {
        let mut inner = self.lock();
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "Session",
                id: session_id.to_string(),
            })?;
        if !session.is_running {
            return Err(StoreError::Conflict {
                session_id: session_id.to_string(),
            });
        }
        session.close(end, notes.map(str::to_string));
        Ok(session.clone())
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|s| s.id != session_id);
        Ok(inner.sessions.len() != before)
    }

    fn get_session(&self, session_id: &str) -> StoreResult<Option<TimeSession>> {
        Ok(self
            .lock()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned())
    }

    fn list_running_sessions(&self) -> StoreResult<Vec<TimeSession>> {
        let mut running: Vec<TimeSession> = self
            .lock()
            .sessions
            .iter()
            .filter(|s| s.is_running)
            .cloned()
            .collect();
        running.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(running)
    }

    fn stop_all_running_sessions(
        &self,
        end: DateTime<Utc>,
        note: &str,
    ) -> StoreResult<Vec<TimeSession>> {
        let mut inner = self.lock();
        let mut stopped = Vec::new();
        for session in inner.sessions.iter_mut().filter(|s| s.is_running) {
            let notes = append_note(session.notes.as_deref(), note);
            session.close(end, Some(notes));
            stopped.push(session.clone());
        }
        Ok(stopped)
    }

    fn list_projects(&self) -> StoreResult<Vec<Project>> {
        Ok(self.lock().projects.clone())
    }

    fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        Ok(self
            .lock()
            .projects
            .iter()
            .find(|p| p.id == project_id)
            .cloned())
    }

    fn upsert_project(&self, project: &Project) -> StoreResult<Project> {
        let mut inner = self.lock();
        match inner.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project.clone(),
            None => inner.projects.push(project.clone()),
        }
        Ok(project.clone())
    }

    fn project_stats(&self, project_id: &str) -> StoreResult<ProjectStats> {
        Ok(stats::summarize(project_id, &self.lock().sessions))
    }

    fn all_project_stats(&self) -> StoreResult<Vec<ProjectStats>> {
        let inner = self.lock();
        Ok(inner
            .projects
            .iter()
            .map(|p| stats::summarize(&p.id, &inner.sessions))
            .collect())
    }

    fn load_setting(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock().settings.get(key).cloned())
    }

    fn save_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock()
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Observed Store
// ═══════════════════════════════════════════════════════════════════════════════

/// What kind of data a successful store mutation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Sessions,
    Projects,
}

/// Wraps a store and publishes a [`StoreChange`] after each successful mutation.
pub struct ObservedStore {
    inner: Arc<dyn SessionStore>,
    changes: Broadcaster<StoreChange>,
}

impl ObservedStore {
    pub fn new(inner: Arc<dyn SessionStore>) -> Self {
        Self {
            inner,
            changes: Broadcaster::new(),
        }
    }

    pub fn subscribe(&self) -> Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StoreChange) {
        let delivered = self.changes.publish(change);
        tracing::trace!(?change, delivered, "Store change published");
    }
}

impl SessionStore for ObservedStore {
    fn start_session(&self, project_id: &str, start: DateTime<Utc>) -> StoreResult<TimeSession> {
        let session = self.inner.start_session(project_id, start)?;
        self.notify(StoreChange::Sessions);
        Ok(session)
    }

    fn stop_session(
        &self,
        session_id: &str,
        end: DateTime<Utc>,
        notes: Option<&str>,
    ) -> StoreResult<TimeSession> {
        let session = self.inner.stop_session(session_id, end, notes)?;
        self.notify(StoreChange::Sessions);
        Ok(session)
    }

    fn delete_session(&self, session_id: &str) -> StoreResult<bool> {
        let removed = self.inner.delete_session(session_id)?;
        if removed {
            self.notify(StoreChange::Sessions);
        }
        Ok(removed)
    }

    fn get_session(&self, session_id: &str) -> StoreResult<Option<TimeSession>> {
        self.inner.get_session(session_id)
    }

    fn list_running_sessions(&self) -> StoreResult<Vec<TimeSession>> {
        self.inner.list_running_sessions()
    }

    fn stop_all_running_sessions(
        &self,
        end: DateTime<Utc>,
        note: &str,
    ) -> StoreResult<Vec<TimeSession>> {
        let stopped = self.inner.stop_all_running_sessions(end, note)?;
        if !stopped.is_empty() {
            self.notify(StoreChange::Sessions);
        }
        Ok(stopped)
    }

    fn list_projects(&self) -> StoreResult<Vec<Project>> {
        self.inner.list_projects()
    }

    fn get_project(&self, project_id: &str) -> StoreResult<Option<Project>> {
        self.inner.get_project(project_id)
    }

    fn upsert_project(&self, project: &Project) -> StoreResult<Project> {
        let project = self.inner.upsert_project(project)?;
        self.notify(StoreChange::Projects);
        Ok(project)
    }

    fn project_stats(&self, project_id: &str) -> StoreResult<ProjectStats> {
        self.inner.project_stats(project_id)
    }

    fn all_project_stats(&self) -> StoreResult<Vec<ProjectStats>> {
        self.inner.all_project_stats()
    }

    fn load_setting(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.load_setting(key)
    }

    fn save_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.save_setting(key, value)
    }
}
