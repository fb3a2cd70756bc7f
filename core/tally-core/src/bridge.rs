//! Reactions to signals from outside the user's direct control.
//!
//! The bridge is the originating layer for system events: on a screen lock
//! it force-stops every running session in the store, then tells the timer
//! the link is gone. The timer never issues its own stop for that session.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::controller::TimerController;
use crate::error::Result;
use crate::store::{SessionStore, AUTO_PAUSE_NOTE};
use crate::timer::TimerState;
use crate::tray::TrayReconciler;
use crate::types::TimeSession;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SystemEvent {
    ScreenLocked,
    ScreenUnlocked,
    TrayProjectToggled { project_id: String },
    Quit,
}

impl SystemEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SystemEvent::ScreenLocked => "screen_locked",
            SystemEvent::ScreenUnlocked => "screen_unlocked",
            SystemEvent::TrayProjectToggled { .. } => "tray_project_toggled",
            SystemEvent::Quit => "quit",
        }
    }
}

/// What handling an event did to the store and the timer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub stopped: Vec<TimeSession>,
    #[serde(default)]
    pub started: Option<TimeSession>,
    pub timer: TimerState,
}

pub struct SystemEventBridge {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl SystemEventBridge {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn handle(
        &self,
        event: SystemEvent,
        timer: &mut TimerController,
        tray: &mut TrayReconciler,
    ) -> Result<EventOutcome> {
        tracing::info!(event = event.name(), "System event received");
        let outcome = match event {
            SystemEvent::ScreenLocked | SystemEvent::Quit => self.stop_everything(timer)?,
            SystemEvent::ScreenUnlocked => EventOutcome {
                stopped: Vec::new(),
                started: None,
                timer: timer.state().clone(),
            },
            SystemEvent::TrayProjectToggled { project_id } => self.toggle(&project_id, timer)?,
        };

        if let Err(err) = tray.reload() {
            tracing::warn!(error = %err, "Tray reload after system event failed");
        }
        Ok(outcome)
    }

    fn stop_everything(&self, timer: &mut TimerController) -> Result<EventOutcome> {
        let stopped = self
            .store
            .stop_all_running_sessions(self.clock.now(), AUTO_PAUSE_NOTE)
            .map_err(|err| {
                tracing::error!(error = %err, "Failed to stop running sessions");
                err
            })?;
        tracing::info!(count = stopped.len(), "Running sessions stopped");

        let state = timer.auto_pause();
        Ok(EventOutcome {
            stopped,
            started: None,
            timer: state,
        })
    }

    /// Stops the project's running session, or starts one if none runs.
    fn toggle(&self, project_id: &str, timer: &mut TimerController) -> Result<EventOutcome> {
        let running = self
            .store
            .list_running_sessions()?
            .into_iter()
            .find(|s| s.project_id == project_id);

        let Some(session) = running else {
            let started = self.store.start_session(project_id, self.clock.now())?;
            tracing::info!(session_id = %started.id, project_id = %project_id, "Session started from tray");
            return Ok(EventOutcome {
                stopped: Vec::new(),
                started: Some(started),
                timer: timer.state().clone(),
            });
        };

        // The timer owns its session; finishing it there keeps the link consistent.
        if timer.state().session_id.as_deref() == Some(session.id.as_str()) {
            let state = timer.complete()?;
            let stopped = self.store.get_session(&session.id)?.into_iter().collect();
            return Ok(EventOutcome {
                stopped,
                started: None,
                timer: state,
            });
        }

        let stopped = self.store.stop_session(&session.id, self.clock.now(), None)?;
        tracing::info!(session_id = %stopped.id, project_id = %project_id, "Session stopped from tray");
        Ok(EventOutcome {
            stopped: vec![stopped],
            started: None,
            timer: timer.state().clone(),
        })
    }
}
