//! Drives the [`TimerMachine`] against real collaborators.
//!
//! The controller is the single owner of timer state. It runs every effect
//! the machine emits (store calls, tick arming, notifications), feeds store
//! outcomes back in, and broadcasts the resulting [`TimerState`] after each
//! operation. It is not `Sync`; the daemon keeps it on its event-loop thread.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::clock::{Clock, SystemClock};
use crate::config::TallyConfig;
use crate::error::Result;
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::store::SessionStore;
use crate::ticker::{NoopTicker, TickControl};
use crate::timer::{Effect, TimerMachine, TimerPhase, TimerState};

pub struct TimerController {
    machine: TimerMachine,
    store: Arc<dyn SessionStore>,
    ticker: Box<dyn TickControl>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    notifications_enabled: bool,
    states: Broadcaster<TimerState>,
}

pub struct TimerControllerBuilder {
    store: Arc<dyn SessionStore>,
    default_minutes: u32,
    max_minutes: u32,
    notifications_enabled: bool,
    ticker: Option<Box<dyn TickControl>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TimerControllerBuilder {
    pub fn ticker(mut self, ticker: Box<dyn TickControl>) -> Self {
        self.ticker = Some(ticker);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> TimerController {
        TimerController {
            machine: TimerMachine::new(self.default_minutes, self.max_minutes),
            store: self.store,
            ticker: self.ticker.unwrap_or_else(|| Box::new(NoopTicker)),
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            notifications_enabled: self.notifications_enabled,
            states: Broadcaster::new(),
        }
    }
}

impl TimerController {
    pub fn builder(store: Arc<dyn SessionStore>, config: &TallyConfig) -> TimerControllerBuilder {
        TimerControllerBuilder {
            store,
            default_minutes: config.timer.default_minutes,
            max_minutes: config.timer.max_minutes,
            notifications_enabled: config.notifications.enabled,
            ticker: None,
            notifier: None,
            clock: None,
        }
    }

    pub fn state(&self) -> &TimerState {
        self.machine.state()
    }

    /// Epoch of the armed tick period; ticks tagged otherwise are ignored.
    pub fn epoch(&self) -> u64 {
        self.machine.epoch()
    }

    pub fn subscribe(&self) -> Receiver<TimerState> {
        self.states.subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────

    pub fn configure(&mut self, project_id: &str, planned_minutes: u32) -> Result<TimerState> {
        self.machine.configure(project_id, planned_minutes)?;
        tracing::debug!(project_id = %project_id.trim(), planned_minutes, "Timer configured");
        Ok(self.publish())
    }

    pub fn start(&mut self) -> Result<TimerState> {
        let effects = self.machine.start()?;
        self.drive(effects)
    }

    pub fn pause(&mut self) -> Result<TimerState> {
        let effects = self.machine.pause()?;
        self.drive(effects)
    }

    pub fn complete(&mut self) -> Result<TimerState> {
        let effects = self.machine.complete()?;
        self.drive(effects)
    }

    pub fn cancel(&mut self) -> Result<TimerState> {
        let effects = self.machine.cancel()?;
        self.drive(effects)
    }

    /// One elapsed interval from the tick source.
    ///
    /// Reaching zero completes the session, so this can surface a stop failure.
    pub fn tick(&mut self, epoch: u64) -> Result<TimerState> {
        let effects = self.machine.tick(epoch);
        if effects.is_empty() {
            if self.machine.state().phase == TimerPhase::Running {
                return Ok(self.publish());
            }
            return Ok(self.machine.state().clone());
        }
        self.drive(effects)
    }

    /// The store already stopped every running session; drop the link.
    pub fn auto_pause(&mut self) -> TimerState {
        let effects = self.machine.auto_pause();
        if effects.is_empty() {
            return self.machine.state().clone();
        }
        tracing::info!(
            project_id = ?self.machine.state().project_id,
            seconds_remaining = self.machine.state().seconds_remaining,
            "Timer auto-paused"
        );
        match self.drive(effects) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "Auto-pause follow-up failed");
                self.machine.state().clone()
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Effect execution
    // ─────────────────────────────────────────────────────────────────────

    fn drive(&mut self, effects: Vec<Effect>) -> Result<TimerState> {
        let outcome = self.run(effects);
        let state = self.publish();
        outcome.map(|_| state)
    }

    fn run(&mut self, effects: Vec<Effect>) -> Result<()> {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            let follow_up = self.execute(effect)?;
            for effect in follow_up.into_iter().rev() {
                queue.push_front(effect);
            }
        }
        Ok(())
    }

    fn execute(&mut self, effect: Effect) -> Result<Vec<Effect>> {
        match effect {
            Effect::ArmTicker { epoch } => {
                self.ticker.arm(epoch);
                Ok(Vec::new())
            }
            Effect::DisarmTicker => {
                self.ticker.disarm();
                Ok(Vec::new())
            }
            Effect::CreateSession { project_id } => {
                let result = self.store.start_session(&project_id, self.clock.now());
                match &result {
                    Ok(session) => {
                        tracing::info!(session_id = %session.id, project_id = %project_id, "Session started")
                    }
                    Err(err) => {
                        tracing::error!(project_id = %project_id, error = %err, "Failed to start session")
                    }
                }
                self.machine.session_created(result)
            }
            Effect::StopSession { session_id } => {
                let result = self.store.stop_session(&session_id, self.clock.now(), None);
                match &result {
                    Ok(session) => tracing::info!(
                        session_id = %session_id,
                        duration_seconds = session.duration_seconds.unwrap_or(0),
                        "Session stopped"
                    ),
                    Err(err) => tracing::error!(
                        session_id = %session_id,
                        error = %err,
                        "Failed to stop session; it stays open in the store"
                    ),
                }
                self.machine.session_stopped(result)
            }
            Effect::DeleteSession { session_id } => {
                let result = self.store.delete_session(&session_id);
                match &result {
                    Ok(removed) => {
                        tracing::info!(session_id = %session_id, removed, "Session discarded")
                    }
                    Err(err) => {
                        tracing::error!(session_id = %session_id, error = %err, "Failed to delete session")
                    }
                }
                self.machine.session_deleted(result)
            }
            Effect::NotifyCompleted { project_id } => {
                let name = self.project_name(&project_id);
                self.deliver(Notification::completed(&name));
                Ok(Vec::new())
            }
            Effect::NotifyAutoSaved { project_id } => {
                let name = self.project_name(&project_id);
                self.deliver(Notification::auto_saved(&name));
                Ok(Vec::new())
            }
        }
    }

    fn project_name(&self, project_id: &str) -> String {
        match self.store.get_project(project_id) {
            Ok(Some(project)) => project.name,
            Ok(None) => project_id.to_string(),
            Err(err) => {
                tracing::debug!(project_id = %project_id, error = %err, "Project lookup failed");
                project_id.to_string()
            }
        }
    }

    fn deliver(&self, notification: Notification) {
        if !self.notifications_enabled {
            return;
        }
        if let Err(err) = self.notifier.notify(&notification) {
            tracing::warn!(title = %notification.title, error = %err, "Notification delivery failed");
        }
    }

    fn publish(&self) -> TimerState {
        let state = self.machine.state().clone();
        self.states.publish(state.clone());
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::types::{Project, ProjectStatus};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> std::result::Result<(), String> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    impl Notifier for FailingNotifier {
        fn notify(&self, _notification: &Notification) -> std::result::Result<(), String> {
            Err("no notification daemon".to_string())
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, Arc<RecordingNotifier>, TimerController) {
        let store = Arc::new(MemoryStore::with_projects([Project::new(
            "P1",
            "Alpha",
            ProjectStatus::Active,
        )]));
        let clock = Arc::new(ManualClock::new(
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let controller = TimerController::builder(store.clone(), &TallyConfig::default())
            .clock(clock.clone())
            .notifier(notifier.clone())
            .build();
        (store, clock, notifier, controller)
    }

    #[test]
    fn full_countdown_records_planned_duration() {
        let (store, clock, notifier, mut controller) = setup();
        controller.configure("P1", 1).expect("configure");
        let state = controller.start().expect("start");
        let session_id = state.session_id.clone().expect("session linked");

        let epoch = controller.epoch();
        for _ in 0..60 {
            clock.advance(1);
            controller.tick(epoch).expect("tick");
        }

        assert_eq!(controller.state().phase, TimerPhase::Idle);
        let session = store
            .get_session(&session_id)
            .expect("get")
            .expect("session exists");
        assert!(!session.is_running);
        assert_eq!(session.duration_seconds, Some(60));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.as_slice(), &[Notification::completed("Alpha")]);
    }

    #[test]
    fn subscribers_see_each_transition() {
        let (_store, _clock, _notifier, mut controller) = setup();
        let states = controller.subscribe();

        controller.configure("P1", 5).expect("configure");
        controller.start().expect("start");
        controller.pause().expect("pause");

        let phases: Vec<TimerPhase> = states.try_iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            vec![TimerPhase::Idle, TimerPhase::Running, TimerPhase::Idle]
        );
    }

    #[test]
    fn unknown_project_surfaces_create_error() {
        let (store, _clock, _notifier, mut controller) = setup();
        controller.configure("ghost", 5).expect("configure");
        let err = controller.start().expect_err("unknown project");
        assert_eq!(err.code(), "session_create_error");
        assert_eq!(controller.state().phase, TimerPhase::Idle);
        assert!(store.all_sessions().is_empty());
    }

    #[test]
    fn notification_failure_is_swallowed() {
        let store = Arc::new(MemoryStore::with_projects([Project::new(
            "P1",
            "Alpha",
            ProjectStatus::Active,
        )]));
        let mut controller = TimerController::builder(store, &TallyConfig::default())
            .notifier(Arc::new(FailingNotifier))
            .build();
        controller.configure("P1", 5).expect("configure");
        controller.start().expect("start");
        controller.complete().expect("complete despite notifier failure");
        assert_eq!(controller.state().phase, TimerPhase::Idle);
    }

    #[test]
    fn disabled_notifications_are_not_sent() {
        let store = Arc::new(MemoryStore::with_projects([Project::new(
            "P1",
            "Alpha",
            ProjectStatus::Active,
        )]));
        let notifier = Arc::new(RecordingNotifier::default());
        let mut config = TallyConfig::default();
        config.notifications.enabled = false;
        let mut controller = TimerController::builder(store, &config)
            .notifier(notifier.clone())
            .build();

        controller.configure("P1", 5).expect("configure");
        controller.start().expect("start");
        controller.complete().expect("complete");
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
