//! Tray projection: which projects the OS tray shows, and in what order.
//!
//! The tray list is active projects sorted by name, followed by the user's
//! pinned projects that are not active, in pin order. A pinned project that
//! becomes active moves into the sorted section without losing its pin; when
//! it leaves the active status it shows up at its pinned position again.
//!
//! Pin edits are speculative until [`PinnedList::save`] writes them under
//! [`TRAY_PINNED_KEY`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Result, StoreError, TallyError};
use crate::store::{SessionStore, StoreChange};
use crate::types::{Project, TimeSession};

/// Settings key holding the pinned ids as a JSON array of strings.
pub const TRAY_PINNED_KEY: &str = "tray_pinned_ids";

// ═══════════════════════════════════════════════════════════════════════════════
// Tray List
// ═══════════════════════════════════════════════════════════════════════════════

/// Active projects by name, then non-active pinned projects in pin order.
///
/// Pins pointing at unknown projects are skipped without complaint, and an
/// active project appears exactly once no matter how it is pinned.
pub fn compute_tray_list(projects: &[Project], pinned_ids: &[String]) -> Vec<Project> {
    let mut active: Vec<Project> = projects.iter().filter(|p| p.is_active()).cloned().collect();
    active.sort_by(by_name);

    let by_id: HashMap<&str, &Project> = projects.iter().map(|p| (p.id.as_str(), p)).collect();
    let mut seen: HashSet<&str> = HashSet::new();
    let pinned = pinned_ids.iter().filter_map(|id| {
        let project = by_id.get(id.as_str())?;
        if project.is_active() || !seen.insert(id.as_str()) {
            return None;
        }
        Some((*project).clone())
    });

    active.into_iter().chain(pinned).collect()
}

/// Letters first, case only breaks ties: "alpha" < "bravo" < "Bravo".
fn by_name(a: &Project, b: &Project) -> Ordering {
    a.name
        .to_lowercase()
        .cmp(&b.name.to_lowercase())
        .then_with(|| b.name.cmp(&a.name))
        .then_with(|| a.id.cmp(&b.id))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Pinned List
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinnedList {
    committed: Vec<String>,
    ids: Vec<String>,
}

impl PinnedList {
    pub fn new(ids: Vec<String>) -> Self {
        let ids = dedup(ids);
        Self {
            committed: ids.clone(),
            ids,
        }
    }

    /// Reads the committed list. A missing or corrupt value loads as empty.
    pub fn load(store: &dyn SessionStore) -> Self {
        let raw = match store.load_setting(TRAY_PINNED_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Self::default(),
            Err(err) => {
                tracing::warn!(key = TRAY_PINNED_KEY, error = %err, "Failed to load pinned projects");
                return Self::default();
            }
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(ids) => Self::new(ids),
            Err(err) => {
                tracing::warn!(key = TRAY_PINNED_KEY, error = %err, "Pinned projects value is corrupt; ignoring");
                Self::default()
            }
        }
    }

    /// Ids including unsaved edits.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Ids as of the last load or save.
    pub fn committed(&self) -> &[String] {
        &self.committed
    }

    /// Appends `project_id` unless already pinned. Returns whether it changed.
    pub fn pin(&mut self, project_id: &str) -> bool {
        if self.ids.iter().any(|id| id == project_id) {
            return false;
        }
        self.ids.push(project_id.to_string());
        true
    }

    pub fn unpin(&mut self, project_id: &str) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| id != project_id);
        self.ids.len() != before
    }

    /// Moves one element. Equal or out-of-range indices are a no-op.
    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        if from == to || from >= self.ids.len() || to >= self.ids.len() {
            return false;
        }
        let id = self.ids.remove(from);
        self.ids.insert(to, id);
        true
    }

    pub fn is_dirty(&self) -> bool {
        self.ids != self.committed
    }

    /// Discards uncommitted edits.
    pub fn revert(&mut self) {
        self.ids = self.committed.clone();
    }

    pub fn save(&mut self, store: &dyn SessionStore) -> Result<()> {
        let value = serde_json::to_string(&self.ids).map_err(|source| TallyError::Json {
            context: "serializing pinned projects".to_string(),
            source,
        })?;
        store.save_setting(TRAY_PINNED_KEY, &value)?;
        self.committed = self.ids.clone();
        tracing::debug!(count = self.ids.len(), "Pinned projects saved");
        Ok(())
    }

    /// Projects that could be pinned: not active, not already pinned, by name.
    pub fn available_projects(&self, projects: &[Project]) -> Vec<Project> {
        let mut available: Vec<Project> = projects
            .iter()
            .filter(|p| !p.is_active() && !self.ids.contains(&p.id))
            .cloned()
            .collect();
        available.sort_by(by_name);
        available
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tray Menu
// ═══════════════════════════════════════════════════════════════════════════════

pub const EMPTY_RUNNING_LABEL: &str = "No running projects";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrayItem {
    /// Identifier the tray reports back when the item is clicked.
    pub action_id: String,
    pub project_id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrayMenu {
    pub running: Vec<TrayItem>,
    pub startable: Vec<TrayItem>,
    /// Shown in place of `running` when nothing runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

pub fn action_id(project_id: &str) -> String {
    format!("project_{}", project_id)
}

/// Parses an action id produced by [`action_id`].
pub fn project_from_action(action: &str) -> Option<&str> {
    action.strip_prefix("project_").filter(|id| !id.is_empty())
}

/// `1h 2m 3s`, `2m 3s` or `3s`.
pub fn format_elapsed(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}

pub fn build_tray_menu(
    projects: &[Project],
    running: &[TimeSession],
    now: DateTime<Utc>,
) -> TrayMenu {
    let by_id: HashMap<&str, &Project> = projects.iter().map(|p| (p.id.as_str(), p)).collect();

    let running_items: Vec<TrayItem> = running
        .iter()
        .filter_map(|session| {
            let project = by_id.get(session.project_id.as_str())?;
            Some(TrayItem {
                action_id: action_id(&project.id),
                project_id: project.id.clone(),
                label: format!(
                    "▶ {} - {}",
                    project.name,
                    format_elapsed(session.elapsed_seconds(now))
                ),
                session_id: Some(session.id.clone()),
            })
        })
        .collect();

    let running_ids: HashSet<&str> = running.iter().map(|s| s.project_id.as_str()).collect();
    let startable = projects
        .iter()
        .filter(|p| !running_ids.contains(p.id.as_str()))
        .map(|p| TrayItem {
            action_id: action_id(&p.id),
            project_id: p.id.clone(),
            label: p.name.clone(),
            session_id: None,
        })
        .collect();

    TrayMenu {
        placeholder: running
            .is_empty()
            .then(|| EMPTY_RUNNING_LABEL.to_string()),
        running: running_items,
        startable,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Reconciler
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything pushed to the tray renderer in one update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraySnapshot {
    pub projects: Vec<Project>,
    pub running: Vec<TimeSession>,
    pub menu: TrayMenu,
    pub generated_at: DateTime<Utc>,
}

/// Renders tray snapshots. Delivery is one-way; failures are only logged.
pub trait TraySink: Send {
    fn update_tray_menu(&mut self, snapshot: &TraySnapshot) -> std::result::Result<(), String>;
}

/// Keeps the tray in step with the store and the pinned list.
pub struct TrayReconciler {
    store: Arc<dyn SessionStore>,
    sink: Box<dyn TraySink>,
    clock: Arc<dyn Clock>,
    pinned: PinnedList,
    projects: Vec<Project>,
    running: Vec<TimeSession>,
    changes: Option<Receiver<StoreChange>>,
}

impl TrayReconciler {
    /// Loads the committed pin list. Call [`TrayReconciler::reload`] to populate.
    pub fn new(store: Arc<dyn SessionStore>, sink: Box<dyn TraySink>, clock: Arc<dyn Clock>) -> Self {
        let pinned = PinnedList::load(store.as_ref());
        Self {
            store,
            sink,
            clock,
            pinned,
            projects: Vec::new(),
            running: Vec::new(),
            changes: None,
        }
    }

    /// Subscribes to store mutations; [`TrayReconciler::pump`] drains them.
    pub fn watch(&mut self, changes: Receiver<StoreChange>) {
        self.changes = Some(changes);
    }

    pub fn pinned(&self) -> &PinnedList {
        &self.pinned
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn running(&self) -> &[TimeSession] {
        &self.running
    }

    /// Full reload of projects and running sessions, then a push.
    pub fn reload(&mut self) -> Result<TraySnapshot> {
        self.projects = self.store.list_projects()?;
        self.running = self.store.list_running_sessions()?;
        Ok(self.refresh())
    }

    /// Reloads if the store changed since the last call.
    pub fn pump(&mut self) -> Result<Option<TraySnapshot>> {
        let changed = match &self.changes {
            Some(changes) => changes.try_iter().count() > 0,
            None => false,
        };
        if changed {
            self.reload().map(Some)
        } else {
            Ok(None)
        }
    }

    /// What the tray currently shows: committed pins only.
    pub fn snapshot(&self) -> TraySnapshot {
        self.project(self.pinned.committed())
    }

    /// Projection with unsaved pin edits applied. Never pushed.
    pub fn preview(&self) -> TraySnapshot {
        self.project(self.pinned.ids())
    }

    fn project(&self, pinned_ids: &[String]) -> TraySnapshot {
        let projects = compute_tray_list(&self.projects, pinned_ids);
        let now = self.clock.now();
        let menu = build_tray_menu(&projects, &self.running, now);
        TraySnapshot {
            projects,
            running: self.running.clone(),
            menu,
            generated_at: now,
        }
    }

    /// Recomputes from cached inputs and pushes to the sink.
    pub fn refresh(&mut self) -> TraySnapshot {
        let snapshot = self.snapshot();
        match self.sink.update_tray_menu(&snapshot) {
            Ok(()) => tracing::debug!(
                projects = snapshot.projects.len(),
                running = snapshot.running.len(),
                "Tray updated"
            ),
            Err(err) => tracing::warn!(error = %err, "Tray update failed"),
        }
        snapshot
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pin edits
    // ─────────────────────────────────────────────────────────────────────

    pub fn pin(&mut self, project_id: &str) -> Result<bool> {
        if !self.projects.iter().any(|p| p.id == project_id) {
            return Err(StoreError::NotFound {
                entity: "Project",
                id: project_id.to_string(),
            }
            .into());
        }
        Ok(self.pinned.pin(project_id))
    }

    pub fn unpin(&mut self, project_id: &str) -> bool {
        self.pinned.unpin(project_id)
    }

    pub fn reorder(&mut self, from: usize, to: usize) -> bool {
        self.pinned.reorder(from, to)
    }

    pub fn revert(&mut self) {
        self.pinned.revert();
    }

    /// Commits pin edits and pushes the resulting tray.
    pub fn save(&mut self) -> Result<TraySnapshot> {
        self.pinned.save(self.store.as_ref())?;
        Ok(self.refresh())
    }
}
