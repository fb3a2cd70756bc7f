//! Client helper for talking to the tally daemon.
//!
//! The daemon is the only writer. Every failure is surfaced to the caller.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tally_core::StorageConfig;
use tally_daemon_protocol::{Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION};

const SOCKET_ENV: &str = "TALLY_SOCKET";
const READ_TIMEOUT_MS: u64 = 12_000;
const WRITE_TIMEOUT_MS: u64 = 600;

/// Sends one request and returns its payload, or `code: message` on error.
pub fn call(method: Method, params: Option<Value>) -> Result<Value, String> {
    let request = Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id: Some(format!("cli-{}", std::process::id())),
        params,
    };

    tracing::debug!(method = ?method, "Sending daemon request");
    let response = send_request(request)?;
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let message = response
            .error
            .map(|err| format!("{}: {}", err.code, err.message))
            .unwrap_or_else(|| "Unknown daemon error".to_string());
        Err(message)
    }
}

fn socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        return Ok(PathBuf::from(path));
    }
    Ok(StorageConfig::resolve()?.socket_file())
}

fn send_request(request: Request) -> Result<Response, String> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        format!(
            "Failed to connect to daemon socket at {}: {} (is tally-daemon running?)",
            socket.display(),
            err
        )
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| format!("Failed to write request: {}", err))?;
    stream
        .write_all(b"\n")
        .map_err(|err| format!("Failed to flush request: {}", err))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err("Response exceeded maximum size".to_string());
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::os::unix::net::UnixListener;
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    struct EnvGuard {
        key: &'static str,
        prior: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prior = std::env::var(key).ok();
            std::env::set_var(key, value);
            Self { key, prior }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.prior {
                std::env::set_var(self.key, value);
            } else {
                std::env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_request(stream: &mut UnixStream) -> Request {
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).expect("read request");
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
            if buffer.contains(&b'\n') {
                break;
            }
        }
        let end = buffer.iter().position(|b| *b == b'\n').unwrap_or(buffer.len());
        serde_json::from_slice(&buffer[..end]).expect("parse request")
    }

    /// Serves exactly one request with `response` on a temp socket.
    fn serve_once(response: Response) -> (tempfile::TempDir, std::thread::JoinHandle<Request>) {
        let dir = tempfile::tempdir().expect("temp dir");
        let socket_path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind");
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = read_request(&mut stream);
            serde_json::to_writer(&mut stream, &response).expect("write response");
            stream.write_all(b"\n").expect("newline");
            request
        });
        (dir, server)
    }

    #[test]
    fn call_returns_payload_from_daemon() {
        let _lock = env_lock();
        let (dir, server) = serve_once(Response::ok(None, json!({"phase": "idle"})));
        let _socket = EnvGuard::set(
            SOCKET_ENV,
            dir.path().join("daemon.sock").to_str().expect("utf8 path"),
        );

        let data = call(Method::GetTimerState, None).expect("call succeeds");
        assert_eq!(data["phase"], "idle");

        let request = server.join().expect("server thread");
        assert_eq!(request.method, Method::GetTimerState);
        assert_eq!(request.protocol_version, PROTOCOL_VERSION);
    }

    #[test]
    fn call_formats_daemon_errors() {
        let _lock = env_lock();
        let (dir, server) = serve_once(Response::error(
            None,
            "invalid_transition",
            "cannot start while running",
        ));
        let _socket = EnvGuard::set(
            SOCKET_ENV,
            dir.path().join("daemon.sock").to_str().expect("utf8 path"),
        );

        let err = call(Method::TimerStart, None).unwrap_err();
        assert_eq!(err, "invalid_transition: cannot start while running");
        server.join().expect("server thread");
    }

    #[test]
    fn call_reports_missing_daemon() {
        let _lock = env_lock();
        let dir = tempfile::tempdir().expect("temp dir");
        let _socket = EnvGuard::set(
            SOCKET_ENV,
            dir.path().join("absent.sock").to_str().expect("utf8 path"),
        );

        let err = call(Method::GetHealth, None).unwrap_err();
        assert!(err.contains("Failed to connect"), "{}", err);
    }
}
