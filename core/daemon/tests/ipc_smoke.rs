use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tally_daemon_protocol::{Method, Request, Response, PROTOCOL_VERSION};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> Child {
    Command::new(env!("CARGO_BIN_EXE_tally-daemon"))
        .env("HOME", home)
        .env_remove("TALLY_HOME")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn tally-daemon")
}

fn tally_dir(home: &Path) -> PathBuf {
    home.join(".tally")
}

fn socket_path(home: &Path) -> PathBuf {
    tally_dir(home).join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_raw(socket: &Path, payload: &[u8]) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    stream.write_all(payload).expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn send_request(socket: &Path, method: Method, params: Option<Value>) -> Response {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(format!("{:?}", method)),
        params,
    };
    let mut payload = serde_json::to_vec(&request).expect("Failed to serialize request");
    payload.push(b'\n');
    send_raw(socket, &payload)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn data(response: Response) -> Value {
    assert!(response.ok, "response was not ok: {:?}", response.error);
    response.data.expect("response payload")
}

fn error_code(response: Response) -> String {
    assert!(!response.ok, "expected an error response");
    response.error.expect("error payload").code
}

fn start_daemon(home: &TempDir) -> (DaemonGuard, PathBuf) {
    let socket = socket_path(home.path());
    let child = spawn_daemon(home.path());
    let guard = DaemonGuard { child };
    wait_for_socket(&socket, Duration::from_secs(5));
    (guard, socket)
}

#[test]
fn daemon_ipc_health_timer_and_tray_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let (_guard, socket) = start_daemon(&home);

    let health = data(send_request(&socket, Method::GetHealth, None));
    assert_eq!(health["status"], "ok");
    assert_eq!(health["timer_phase"], "idle");
    assert_eq!(health["recovery"]["orphaned"], json!([]));

    for (id, name, status) in [("P1", "Writing", "active"), ("P2", "Reading", "paused")] {
        data(send_request(
            &socket,
            Method::UpsertProject,
            Some(json!({"id": id, "name": name, "status": status})),
        ));
    }

    data(send_request(
        &socket,
        Method::TimerConfigure,
        Some(json!({"project_id": "P1", "minutes": 25})),
    ));
    let state = data(send_request(&socket, Method::TimerStart, None));
    assert_eq!(state["phase"], "running");
    assert!(state["session_id"].is_string());

    let code = error_code(send_request(&socket, Method::TimerStart, None));
    assert_eq!(code, "invalid_transition");

    let running = data(send_request(&socket, Method::ListRunningSessions, None));
    assert_eq!(running.as_array().map(Vec::len), Some(1));

    let state = data(send_request(&socket, Method::TimerCancel, None));
    assert_eq!(state["phase"], "idle");
    assert_eq!(state["seconds_remaining"], 0);

    let running = data(send_request(&socket, Method::ListRunningSessions, None));
    assert_eq!(running, json!([]));

    data(send_request(
        &socket,
        Method::TrayPin,
        Some(json!({"project_id": "P2"})),
    ));
    let view = data(send_request(&socket, Method::TraySave, None));
    assert_eq!(view["dirty"], false);
    assert_eq!(view["pinned_ids"], json!(["P2"]));

    let tray_file = std::fs::read_to_string(tally_dir(home.path()).join("tray.json"))
        .expect("tray file written");
    let tray: Value = serde_json::from_str(&tray_file).expect("tray file is JSON");
    let ids: Vec<&str> = tray["projects"]
        .as_array()
        .expect("projects array")
        .iter()
        .filter_map(|p| p["id"].as_str())
        .collect();
    assert_eq!(ids, vec!["P1", "P2"]);
}

#[test]
fn daemon_lock_event_stops_running_sessions() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let (_guard, socket) = start_daemon(&home);

    data(send_request(
        &socket,
        Method::UpsertProject,
        Some(json!({"id": "P1", "name": "Writing"})),
    ));
    data(send_request(
        &socket,
        Method::TimerConfigure,
        Some(json!({"project_id": "P1", "minutes": 5})),
    ));
    data(send_request(&socket, Method::TimerStart, None));

    let outcome = data(send_request(
        &socket,
        Method::SystemEvent,
        Some(json!({"event": "screen_locked"})),
    ));
    assert_eq!(outcome["stopped"].as_array().map(Vec::len), Some(1));
    assert_eq!(outcome["timer"]["phase"], "idle");
    assert_eq!(outcome["timer"]["session_id"], Value::Null);

    let running = data(send_request(&socket, Method::ListRunningSessions, None));
    assert_eq!(running, json!([]));

    let stats = data(send_request(
        &socket,
        Method::GetProjectStats,
        Some(json!({"project_id": "P1"})),
    ));
    assert_eq!(stats["session_count"], 1);
}

#[test]
fn daemon_countdown_completes_with_fast_ticks() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let dir = tally_dir(home.path());
    std::fs::create_dir_all(&dir).expect("create tally dir");
    std::fs::write(
        dir.join("config.toml"),
        "[timer]\ntick_interval_ms = 10\n\n[notifications]\nenabled = false\n",
    )
    .expect("write config");
    let (_guard, socket) = start_daemon(&home);

    data(send_request(
        &socket,
        Method::UpsertProject,
        Some(json!({"id": "P1", "name": "Writing"})),
    ));
    data(send_request(
        &socket,
        Method::TimerConfigure,
        Some(json!({"project_id": "P1", "minutes": 1})),
    ));
    data(send_request(&socket, Method::TimerStart, None));

    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let state = data(send_request(&socket, Method::GetTimerState, None));
        if state["phase"] == "idle" {
            assert_eq!(state["seconds_remaining"], 0);
            assert_eq!(state["session_id"], Value::Null);
            break;
        }
        assert!(Instant::now() < deadline, "countdown never finished");
        sleep(Duration::from_millis(50));
    }

    let stats = data(send_request(
        &socket,
        Method::GetProjectStats,
        Some(json!({"project_id": "P1"})),
    ));
    assert_eq!(stats["session_count"], 1);
    let running = data(send_request(&socket, Method::ListRunningSessions, None));
    assert_eq!(running, json!([]));
}

#[test]
fn daemon_rejects_malformed_requests() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let (_guard, socket) = start_daemon(&home);

    assert_eq!(error_code(send_raw(&socket, b"not json\n")), "invalid_json");
    assert_eq!(error_code(send_raw(&socket, b"   \n")), "empty_request");

    let mismatch = br#"{"protocol_version":99,"method":"get_health"}
"#;
    assert_eq!(error_code(send_raw(&socket, mismatch)), "protocol_mismatch");

    let code = error_code(send_request(
        &socket,
        Method::TimerConfigure,
        Some(json!({"project_id": "P1", "minutes": 0})),
    ));
    assert_eq!(code, "invalid_params");

    let code = error_code(send_request(
        &socket,
        Method::TimerConfigure,
        Some(json!({"project_id": "P1", "minutes": 1000})),
    ));
    assert_eq!(code, "validation_error");

    data(send_request(
        &socket,
        Method::TimerConfigure,
        Some(json!({"project_id": "missing", "minutes": 5})),
    ));
    let code = error_code(send_request(&socket, Method::TimerStart, None));
    assert_eq!(code, "session_create_error");
}
