//! The session timer as a pure state machine.
//!
//! `TimerMachine` performs no I/O. Every operation validates against the
//! current phase, updates state and returns the [`Effect`]s the driver must
//! carry out, in order. Store calls are modeled as pending calls: the driver
//! executes the effect and feeds the outcome back through
//! [`TimerMachine::session_created`], [`TimerMachine::session_stopped`] or
//! [`TimerMachine::session_deleted`]. While a call is pending every other
//! operation is rejected with [`TallyError::Busy`], so a double start can
//! never open two sessions.
//!
//! Ticks carry the epoch they were armed with. Any exit from `running` bumps
//! the epoch, so a tick that was already queued is ignored instead of
//! re-entering completion.
//!
//! ```text
//!  Idle ──start──► [create] ──► Running ──tick to 0 / complete──► Completed ──[stop]──► Idle
//!   ▲                            │  │
//!   └──── pause / auto-pause ────┘  └──── cancel ────► Cancelled ──[delete]──► Idle
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_TIMER_MINUTES, MAX_TIMER_MINUTES, TIMER_MINUTES_CEILING};
use crate::error::{Result, StoreError, TallyError};
use crate::types::TimeSession;

// ═══════════════════════════════════════════════════════════════════════════════
// State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerPhase {
    Idle,
    Running,
    /// Transient: the stop call for a finished countdown is in flight.
    Completed,
    /// Transient: the delete call for a discarded session is in flight.
    Cancelled,
}

impl TimerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerPhase::Idle => "idle",
            TimerPhase::Running => "running",
            TimerPhase::Completed => "completed",
            TimerPhase::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for TimerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A store call the machine is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingCall {
    CreateSession,
    StopSession,
    DeleteSession,
}

/// Snapshot of the timer, broadcast to every reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub project_id: Option<String>,
    pub planned_minutes: u32,
    pub planned_seconds: u32,
    pub seconds_remaining: u32,
    pub phase: TimerPhase,
    pub session_id: Option<String>,
    pub session_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pending: Option<PendingCall>,
}

impl TimerState {
    pub fn initial(default_minutes: u32) -> Self {
        Self {
            project_id: None,
            planned_minutes: default_minutes,
            planned_seconds: 0,
            seconds_remaining: 0,
            phase: TimerPhase::Idle,
            session_id: None,
            session_started_at: None,
            pending: None,
        }
    }

    /// Idle with an open session: the user paused the countdown.
    pub fn is_paused(&self) -> bool {
        self.phase == TimerPhase::Idle && self.session_id.is_some()
    }

    /// Idle with time left on the clock, whether or not a session is open.
    pub fn has_residual_time(&self) -> bool {
        self.phase == TimerPhase::Idle && self.seconds_remaining > 0
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Effects
// ═══════════════════════════════════════════════════════════════════════════════

/// Work the driver must perform on behalf of the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a session; report back via `session_created`.
    CreateSession { project_id: String },
    /// Close a session at the current instant; report back via `session_stopped`.
    StopSession { session_id: String },
    /// Discard a session; report back via `session_deleted`.
    DeleteSession { session_id: String },
    /// Start delivering one tick per interval tagged with `epoch`.
    ArmTicker { epoch: u64 },
    /// Stop the tick source before anything else happens.
    DisarmTicker,
    NotifyCompleted { project_id: String },
    NotifyAutoSaved { project_id: String },
}

// ═══════════════════════════════════════════════════════════════════════════════
// Machine
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct TimerMachine {
    state: TimerState,
    default_minutes: u32,
    max_minutes: u32,
    epoch: u64,
}

impl Default for TimerMachine {
    fn default() -> Self {
        Self::new(DEFAULT_TIMER_MINUTES, MAX_TIMER_MINUTES)
    }
}

impl TimerMachine {
    pub fn new(default_minutes: u32, max_minutes: u32) -> Self {
        let max_minutes = max_minutes.clamp(1, TIMER_MINUTES_CEILING);
        let default_minutes = default_minutes.clamp(1, max_minutes);
        Self {
            state: TimerState::initial(default_minutes),
            default_minutes,
            max_minutes,
            epoch: 0,
        }
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    /// Epoch of the currently armed tick period.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    // ─────────────────────────────────────────────────────────────────────
    // User operations
    // ─────────────────────────────────────────────────────────────────────

    pub fn configure(&mut self, project_id: &str, planned_minutes: u32) -> Result<()> {
        self.ensure_not_pending("configure")?;
        self.ensure_phase("configure", TimerPhase::Idle)?;
        if self.state.session_id.is_some() || self.state.seconds_remaining > 0 {
            return Err(TallyError::Validation(
                "timer has time remaining; cancel it before reconfiguring".to_string(),
            ));
        }

        let project_id = project_id.trim();
        if project_id.is_empty() {
            return Err(TallyError::Validation(
                "project id must not be empty".to_string(),
            ));
        }
        if planned_minutes < 1 || planned_minutes > self.max_minutes {
            return Err(TallyError::Validation(format!(
                "planned minutes must be between 1 and {}, got {}",
                self.max_minutes, planned_minutes
            )));
        }

        self.state.project_id = Some(project_id.to_string());
        self.state.planned_minutes = planned_minutes;
        Ok(())
    }

    /// Starts a fresh session or resumes a user-paused one.
    pub fn start(&mut self) -> Result<Vec<Effect>> {
        self.ensure_not_pending("start")?;
        self.ensure_phase("start", TimerPhase::Idle)?;
        let Some(project_id) = self.state.project_id.clone() else {
            return Err(TallyError::Validation(
                "no project configured for the timer".to_string(),
            ));
        };

        if self.state.session_id.is_some() {
            self.state.phase = TimerPhase::Running;
            return Ok(vec![Effect::ArmTicker {
                epoch: self.next_epoch(),
            }]);
        }

        self.state.pending = Some(PendingCall::CreateSession);
        Ok(vec![Effect::CreateSession { project_id }])
    }

    /// Halts the countdown; the session stays open.
    pub fn pause(&mut self) -> Result<Vec<Effect>> {
        self.ensure_not_pending("pause")?;
        self.ensure_phase("pause", TimerPhase::Running)?;
        self.state.phase = TimerPhase::Idle;
        self.next_epoch();
        Ok(vec![Effect::DisarmTicker])
    }

    /// Ends the session early, recording it as completed work.
    pub fn complete(&mut self) -> Result<Vec<Effect>> {
        self.ensure_not_pending("complete")?;
        let allowed = self.state.phase == TimerPhase::Running || self.state.is_paused();
        if !allowed {
            return Err(self.invalid("complete"));
        }
        Ok(self.begin_complete())
    }

    /// Discards the current session and resets the timer configuration.
    pub fn cancel(&mut self) -> Result<Vec<Effect>> {
        self.ensure_not_pending("cancel")?;
        let allowed = self.state.phase == TimerPhase::Running
            || self.state.is_paused()
            || self.state.has_residual_time();
        if !allowed {
            return Err(self.invalid("cancel"));
        }

        self.next_epoch();
        match self.state.session_id.clone() {
            Some(session_id) => {
                self.state.phase = TimerPhase::Cancelled;
                self.state.pending = Some(PendingCall::DeleteSession);
                Ok(vec![
                    Effect::DisarmTicker,
                    Effect::DeleteSession { session_id },
                ])
            }
            None => {
                self.reset();
                Ok(vec![Effect::DisarmTicker])
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Driver inputs
    // ─────────────────────────────────────────────────────────────────────

    /// One elapsed interval. Stale epochs and non-running phases are ignored.
    pub fn tick(&mut self, epoch: u64) -> Vec<Effect> {
        if self.state.phase != TimerPhase::Running
            || self.state.pending.is_some()
            || epoch != self.epoch
        {
            return Vec::new();
        }

        self.state.seconds_remaining = self.state.seconds_remaining.saturating_sub(1);
        if self.state.seconds_remaining == 0 {
            return self.begin_complete();
        }
        Vec::new()
    }

    /// The store already closed every running session (screen lock).
    ///
    /// Drops the session link but keeps the remaining time visible.
    pub fn auto_pause(&mut self) -> Vec<Effect> {
        if self.state.pending.is_some() || self.state.session_id.is_none() {
            return Vec::new();
        }

        self.state.phase = TimerPhase::Idle;
        self.state.session_id = None;
        self.state.session_started_at = None;
        self.next_epoch();

        let mut effects = vec![Effect::DisarmTicker];
        if let Some(project_id) = self.state.project_id.clone() {
            effects.push(Effect::NotifyAutoSaved { project_id });
        }
        effects
    }

    pub fn session_created(
        &mut self,
        result: std::result::Result<TimeSession, StoreError>,
    ) -> Result<Vec<Effect>> {
        self.take_pending(PendingCall::CreateSession)?;
        let session = result.map_err(TallyError::SessionCreate)?;

        if self.state.seconds_remaining == 0 {
            self.state.planned_seconds = self.state.planned_minutes.saturating_mul(60);
            self.state.seconds_remaining = self.state.planned_seconds;
        }
        self.state.session_id = Some(session.id);
        self.state.session_started_at = Some(session.start_time);
        self.state.phase = TimerPhase::Running;
        Ok(vec![Effect::ArmTicker {
            epoch: self.next_epoch(),
        }])
    }

    /// Local state resets whether or not the store call succeeded.
    pub fn session_stopped(
        &mut self,
        result: std::result::Result<TimeSession, StoreError>,
    ) -> Result<Vec<Effect>> {
        self.take_pending(PendingCall::StopSession)?;
        let session_id = self.state.session_id.clone().unwrap_or_default();
        let project_id = self.state.project_id.clone().unwrap_or_default();
        self.reset();

        match result {
            Ok(_) => Ok(vec![Effect::NotifyCompleted { project_id }]),
            Err(source) => Err(TallyError::SessionStop { session_id, source }),
        }
    }

    /// A missing session counts as discarded.
    pub fn session_deleted(
        &mut self,
        result: std::result::Result<bool, StoreError>,
    ) -> Result<Vec<Effect>> {
        self.take_pending(PendingCall::DeleteSession)?;
        let session_id = self.state.session_id.clone().unwrap_or_default();
        self.reset();

        match result {
            Ok(_) => Ok(Vec::new()),
            Err(source) if source.is_not_found() => Ok(Vec::new()),
            Err(source) => Err(TallyError::SessionDelete { session_id, source }),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn begin_complete(&mut self) -> Vec<Effect> {
        self.next_epoch();
        self.state.phase = TimerPhase::Completed;
        match self.state.session_id.clone() {
            Some(session_id) => {
                self.state.pending = Some(PendingCall::StopSession);
                vec![Effect::DisarmTicker, Effect::StopSession { session_id }]
            }
            None => {
                self.reset();
                vec![Effect::DisarmTicker]
            }
        }
    }

    fn reset(&mut self) {
        self.state = TimerState::initial(self.default_minutes);
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn ensure_not_pending(&self, operation: &'static str) -> Result<()> {
        match self.state.pending {
            Some(_) => Err(TallyError::Busy { operation }),
            None => Ok(()),
        }
    }

    fn ensure_phase(&self, operation: &'static str, expected: TimerPhase) -> Result<()> {
        if self.state.phase == expected {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> TallyError {
        TallyError::InvalidTransition {
            operation,
            phase: self.state.phase,
        }
    }

    fn take_pending(&mut self, expected: PendingCall) -> Result<()> {
        if self.state.pending == Some(expected) {
            self.state.pending = None;
            Ok(())
        } else {
            Err(self.invalid("apply store result"))
        }
    }
}
