//! The daemon's single event loop.
//!
//! Socket threads and the tick source only ever send [`Message`]s here. One
//! thread owns the timer controller, the tray reconciler and the event
//! bridge, so every mutation is applied in arrival order.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use tally_core::{
    detect_orphans, Clock, ObservedStore, Project, ProjectStatus, RecoveryReport, SessionStore,
    SystemClock, SystemEvent, SystemEventBridge, TallyConfig, TallyError, TickControl,
    TimerController, TimerState, TraySink, TrayReconciler,
};
use tally_daemon_protocol::{
    parse_params, ConfigureParams, ErrorInfo, EventKind, EventParams, Method, ProjectParams,
    ReorderParams, Request, Response, StatsParams, UpsertProjectParams, PROTOCOL_VERSION,
};

pub enum Message {
    Request {
        request: Request,
        reply: Sender<Response>,
    },
    Tick {
        epoch: u64,
    },
}

pub struct Runtime {
    store: Arc<ObservedStore>,
    controller: TimerController,
    tray: TrayReconciler,
    bridge: SystemEventBridge,
    recovery: RecoveryReport,
    last_pushed_timer: TimerState,
    started_at: DateTime<Utc>,
}

impl Runtime {
    /// `make_sink` receives the controller's timer broadcasts so the tray
    /// push can carry the current countdown.
    pub fn new(
        store: Arc<dyn SessionStore>,
        config: &TallyConfig,
        ticker: Box<dyn TickControl>,
        make_sink: impl FnOnce(Receiver<TimerState>) -> Box<dyn TraySink>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = Arc::new(ObservedStore::new(store));

        let controller = TimerController::builder(store.clone(), config)
            .ticker(ticker)
            .clock(clock.clone())
            .build();

        let sink = make_sink(controller.subscribe());
        let mut tray = TrayReconciler::new(store.clone(), sink, clock.clone());
        tray.watch(store.subscribe());
        if let Err(err) = tray.reload() {
            warn!(error = %err, "Initial tray load failed");
        }

        let recovery = match store.list_running_sessions() {
            Ok(running) => detect_orphans(&running, controller.state()),
            Err(err) => {
                warn!(error = %err, "Failed to list running sessions at startup");
                RecoveryReport::default()
            }
        };
        if !recovery.is_clean() {
            warn!(
                count = recovery.orphaned.len(),
                "Sessions left running by a previous process; leaving them for manual review"
            );
        }

        let bridge = SystemEventBridge::new(store.clone(), clock);
        let last_pushed_timer = controller.state().clone();

        Self {
            store,
            controller,
            tray,
            bridge,
            recovery,
            last_pushed_timer,
            started_at: Utc::now(),
        }
    }

    /// Processes messages until every sender is gone.
    pub fn run(mut self, inbox: Receiver<Message>) {
        info!("Event loop started");
        for message in inbox {
            match message {
                Message::Request { request, reply } => {
                    let response = self.handle_request(request);
                    if reply.send(response).is_err() {
                        debug!("Client went away before the response was ready");
                    }
                }
                Message::Tick { epoch } => self.handle_tick(epoch),
            }
        }
        info!("Event loop stopped");
    }

    fn handle_tick(&mut self, epoch: u64) {
        if let Err(err) = self.controller.tick(epoch) {
            error!(code = err.code(), error = %err, "Timer tick failed");
        }
        self.pump_tray();
    }

    /// Reloads the tray after store changes, or re-pushes it when only the
    /// timer moved.
    fn pump_tray(&mut self) {
        let reloaded = match self.tray.pump() {
            Ok(snapshot) => snapshot.is_some(),
            Err(err) => {
                warn!(error = %err, "Tray refresh failed");
                false
            }
        };
        let timer = self.controller.state();
        if !reloaded && *timer != self.last_pushed_timer {
            self.tray.refresh();
        }
        self.last_pushed_timer = self.controller.state().clone();
    }

    pub fn handle_request(&mut self, request: Request) -> Response {
        if request.protocol_version != PROTOCOL_VERSION {
            return Response::error(
                request.id,
                "protocol_mismatch",
                "unsupported protocol version",
            );
        }

        debug!(method = ?request.method, id = ?request.id, "Dispatching request");
        let id = request.id;
        let params = request.params;
        let result = match request.method {
            Method::GetHealth => Ok(self.health()),
            Method::GetTimerState => to_value(self.controller.state(), "timer state"),
            Method::TimerConfigure => self.timer_configure(params),
            Method::TimerStart => self.timer_op(|c| c.start()),
            Method::TimerPause => self.timer_op(|c| c.pause()),
            Method::TimerComplete => self.timer_op(|c| c.complete()),
            Method::TimerCancel => self.timer_op(|c| c.cancel()),
            Method::GetTray => self.tray_view(),
            Method::TrayPin => self.tray_pin(params),
            Method::TrayUnpin => self.tray_unpin(params),
            Method::TrayReorder => self.tray_reorder(params),
            Method::TraySave => self.tray_save(),
            Method::TrayRevert => {
                self.tray.revert();
                self.tray_view()
            }
            Method::SystemEvent => self.system_event(params),
            Method::ListProjects => self
                .store
                .list_projects()
                .map_err(|err| store_error(err.into()))
                .and_then(|projects| to_value(&projects, "projects")),
            Method::UpsertProject => self.upsert_project(params),
            Method::ListRunningSessions => self
                .store
                .list_running_sessions()
                .map_err(|err| store_error(err.into()))
                .and_then(|sessions| to_value(&sessions, "sessions")),
            Method::GetProjectStats => self.project_stats(params),
        };

        self.pump_tray();
        match result {
            Ok(data) => Response::ok(id, data),
            Err(err) => Response::error_with_info(id, err),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Handlers
    // ─────────────────────────────────────────────────────────────────────

    fn health(&self) -> Value {
        let mut data = json!({
            "status": "ok",
            "pid": std::process::id(),
            "version": env!("CARGO_PKG_VERSION"),
            "protocol_version": PROTOCOL_VERSION,
            "started_at": self.started_at.to_rfc3339(),
            "timer_phase": self.controller.state().phase,
        });
        if let Ok(value) = serde_json::to_value(&self.recovery) {
            data["recovery"] = value;
        }
        data
    }

    fn timer_configure(&mut self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: ConfigureParams = parse_params(params)?;
        params.validate()?;
        let state = self
            .controller
            .configure(&params.project_id, params.minutes)
            .map_err(store_error)?;
        to_value(&state, "timer state")
    }

    fn timer_op(
        &mut self,
        op: impl FnOnce(&mut TimerController) -> tally_core::Result<tally_core::TimerState>,
    ) -> Result<Value, ErrorInfo> {
        let state = op(&mut self.controller).map_err(store_error)?;
        to_value(&state, "timer state")
    }

    fn tray_view(&self) -> Result<Value, ErrorInfo> {
        let pinned = self.tray.pinned();
        let view = json!({
            "snapshot": self.tray.preview(),
            "pinned_ids": pinned.ids(),
            "dirty": pinned.is_dirty(),
            "available": pinned.available_projects(self.tray.projects()),
        });
        Ok(view)
    }

    fn tray_pin(&mut self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: ProjectParams = parse_params(params)?;
        params.validate()?;
        self.tray.pin(&params.project_id).map_err(store_error)?;
        self.tray_view()
    }

    fn tray_unpin(&mut self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: ProjectParams = parse_params(params)?;
        params.validate()?;
        self.tray.unpin(&params.project_id);
        self.tray_view()
    }

    fn tray_reorder(&mut self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: ReorderParams = parse_params(params)?;
        self.tray.reorder(params.from, params.to);
        self.tray_view()
    }

    fn tray_save(&mut self) -> Result<Value, ErrorInfo> {
        self.tray.save().map_err(store_error)?;
        self.tray_view()
    }

    fn system_event(&mut self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: EventParams = parse_params(params)?;
        params.validate()?;
        let event = match params.event {
            EventKind::ScreenLocked => SystemEvent::ScreenLocked,
            EventKind::ScreenUnlocked => SystemEvent::ScreenUnlocked,
            EventKind::Quit => SystemEvent::Quit,
            EventKind::TrayProjectToggled => SystemEvent::TrayProjectToggled {
                project_id: params.project_id.unwrap_or_default(),
            },
        };
        info!(event = event.name(), recorded_at = ?params.recorded_at, "System event");

        let outcome = self
            .bridge
            .handle(event, &mut self.controller, &mut self.tray)
            .map_err(store_error)?;
        to_value(&outcome, "event outcome")
    }

    fn upsert_project(&mut self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: UpsertProjectParams = parse_params(params)?;
        params.validate()?;
        let status = match params.status.as_deref() {
            Some(raw) => ProjectStatus::from_str(raw).ok_or_else(|| {
                ErrorInfo::new("invalid_params", format!("unknown status: {}", raw))
            })?,
            None => ProjectStatus::Active,
        };
        let mut project = Project::new(params.id.trim(), params.name.trim(), status);
        project.color = params.color;

        let saved = self
            .store
            .upsert_project(&project)
            .map_err(|err| store_error(err.into()))?;
        info!(project_id = %saved.id, status = %saved.status, "Project saved");
        to_value(&saved, "project")
    }

    fn project_stats(&self, params: Option<Value>) -> Result<Value, ErrorInfo> {
        let params: StatsParams = match params {
            Some(params) => parse_params(Some(params))?,
            None => StatsParams::default(),
        };
        params.validate()?;

        match params.project_id {
            Some(project_id) => {
                let known = self
                    .store
                    .get_project(&project_id)
                    .map_err(|err| store_error(err.into()))?;
                if known.is_none() {
                    return Err(ErrorInfo::new(
                        "not_found",
                        format!("Project not found: {}", project_id),
                    ));
                }
                let stats = self
                    .store
                    .project_stats(&project_id)
                    .map_err(|err| store_error(err.into()))?;
                to_value(&stats, "project stats")
            }
            None => {
                let stats = self
                    .store
                    .all_project_stats()
                    .map_err(|err| store_error(err.into()))?;
                to_value(&stats, "project stats")
            }
        }
    }
}

fn store_error(err: TallyError) -> ErrorInfo {
    ErrorInfo::new(err.code(), err.to_string())
}

fn to_value<T: Serialize + ?Sized>(value: &T, what: &str) -> Result<Value, ErrorInfo> {
    serde_json::to_value(value).map_err(|err| {
        ErrorInfo::new(
            "serialization_error",
            format!("Failed to serialize {}: {}", what, err),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{MemoryStore, NoopTicker, TraySnapshot};

    struct NullSink;

    impl TraySink for NullSink {
        fn update_tray_menu(&mut self, _snapshot: &TraySnapshot) -> Result<(), String> {
            Ok(())
        }
    }

    fn runtime() -> Runtime {
        let store = Arc::new(MemoryStore::with_projects([
            Project::new("P1", "Writing", ProjectStatus::Active),
            Project::new("P2", "Reading", ProjectStatus::Paused),
        ]));
        Runtime::new(store, &TallyConfig::default(), Box::new(NoopTicker), |_| {
            Box::new(NullSink)
        })
    }

    fn call(runtime: &mut Runtime, method: Method, params: Option<Value>) -> Response {
        runtime.handle_request(Request::new(method, params))
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let mut runtime = runtime();
        let mut request = Request::new(Method::GetHealth, None);
        request.protocol_version = 99;
        let response = runtime.handle_request(request);
        assert!(!response.ok);
        assert_eq!(response.error.expect("error").code, "protocol_mismatch");
    }

    #[test]
    fn timer_round_trip_over_requests() {
        let mut runtime = runtime();
        let response = call(
            &mut runtime,
            Method::TimerConfigure,
            Some(json!({"project_id": "P1", "minutes": 25})),
        );
        assert!(response.ok, "{:?}", response.error);

        let response = call(&mut runtime, Method::TimerStart, None);
        let data = response.data.expect("state");
        assert_eq!(data["phase"], "running");
        assert_eq!(data["seconds_remaining"], 1500);

        let response = call(&mut runtime, Method::TimerStart, None);
        assert_eq!(response.error.expect("error").code, "invalid_transition");

        let response = call(&mut runtime, Method::ListRunningSessions, None);
        assert_eq!(response.data.expect("sessions").as_array().map(Vec::len), Some(1));

        let response = call(&mut runtime, Method::TimerCancel, None);
        assert_eq!(response.data.expect("state")["phase"], "idle");
    }

    #[test]
    fn invalid_params_are_reported() {
        let mut runtime = runtime();
        let response = call(
            &mut runtime,
            Method::TimerConfigure,
            Some(json!({"project_id": "P1", "minutes": 0})),
        );
        assert_eq!(response.error.expect("error").code, "invalid_params");

        let response = call(&mut runtime, Method::TrayReorder, None);
        assert_eq!(response.error.expect("error").code, "invalid_params");
    }

    #[test]
    fn lock_event_auto_pauses_timer() {
        let mut runtime = runtime();
        call(
            &mut runtime,
            Method::TimerConfigure,
            Some(json!({"project_id": "P1", "minutes": 5})),
        );
        call(&mut runtime, Method::TimerStart, None);

        let response = call(
            &mut runtime,
            Method::SystemEvent,
            Some(json!({"event": "screen_locked"})),
        );
        let data = response.data.expect("outcome");
        assert_eq!(data["stopped"].as_array().map(Vec::len), Some(1));
        assert_eq!(data["timer"]["phase"], "idle");
        assert_eq!(data["timer"]["session_id"], Value::Null);
    }

    #[test]
    fn tray_pin_save_and_view() {
        let mut runtime = runtime();
        let response = call(
            &mut runtime,
            Method::TrayPin,
            Some(json!({"project_id": "P2"})),
        );
        let view = response.data.expect("view");
        assert_eq!(view["dirty"], true);

        let response = call(&mut runtime, Method::TraySave, None);
        let view = response.data.expect("view");
        assert_eq!(view["dirty"], false);
        let ids: Vec<&str> = view["snapshot"]["projects"]
            .as_array()
            .expect("projects")
            .iter()
            .filter_map(|p| p["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["P1", "P2"]);

        let response = call(
            &mut runtime,
            Method::TrayPin,
            Some(json!({"project_id": "ghost"})),
        );
        assert_eq!(response.error.expect("error").code, "not_found");
    }

    #[test]
    fn stats_for_unknown_project_is_not_found() {
        let mut runtime = runtime();
        let response = call(
            &mut runtime,
            Method::GetProjectStats,
            Some(json!({"project_id": "ghost"})),
        );
        assert_eq!(response.error.expect("error").code, "not_found");

        let response = call(&mut runtime, Method::GetProjectStats, None);
        assert_eq!(response.data.expect("stats").as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn upserted_project_shows_in_tray() {
        let mut runtime = runtime();
        let response = call(
            &mut runtime,
            Method::UpsertProject,
            Some(json!({"id": "P3", "name": "Anthology", "status": "active"})),
        );
        assert!(response.ok, "{:?}", response.error);

        let response = call(&mut runtime, Method::GetTray, None);
        let view = response.data.expect("view");
        let first = &view["snapshot"]["projects"][0];
        assert_eq!(first["id"], "P3");
    }
}
