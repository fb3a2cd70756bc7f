//! Tally daemon entrypoint.
//!
//! A small, single-writer service: a socket listener with strict request
//! validation, one event-loop thread that owns the timer and tray, and a
//! SQLite-backed session store.

use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use fs_err as fs;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::{load_config, IntervalTicker, StorageConfig, TallyConfig};
use tally_daemon_protocol::{ErrorInfo, Request, Response, MAX_REQUEST_BYTES};

mod db;
mod runtime;
mod tray_file;

use db::Db;
use runtime::{Message, Runtime};
use tray_file::FileTraySink;

const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const RESPONSE_TIMEOUT_SECS: u64 = 10;

fn main() {
    init_logging();

    let storage = match StorageConfig::resolve() {
        Ok(storage) => storage,
        Err(err) => {
            error!(error = %err, "Failed to resolve tally directory");
            std::process::exit(1);
        }
    };

    let config = match load_config(&storage.config_file()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            TallyConfig::default()
        }
    };

    let socket_path = storage.socket_file();
    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "Tally daemon started");

    let db = match Db::new(storage.db_file()) {
        Ok(db) => db,
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let (sender, inbox) = mpsc::channel::<Message>();
    let tick_sender = sender.clone();
    let ticker = IntervalTicker::new(
        Duration::from_millis(config.timer.tick_interval_ms),
        Arc::new(move |epoch| {
            let _ = tick_sender.send(Message::Tick { epoch });
        }),
    );

    let tray_path = storage.tray_file();
    let runtime = Runtime::new(Arc::new(db), &config, Box::new(ticker), move |timer| {
        Box::new(FileTraySink::new(tray_path).with_timer(timer))
    });
    info!(
        default_minutes = config.timer.default_minutes,
        tick_interval_ms = config.timer.tick_interval_ms,
        notifications = config.notifications.enabled,
        "Runtime config loaded"
    );

    thread::spawn(move || runtime.run(inbox));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let sender = sender.clone();
                thread::spawn(move || handle_connection(stream, sender));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("TALLY_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, sender: Sender<Message>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = dispatch(request, &sender);
    let _ = write_response(&mut stream, response);
}

/// Hands the request to the event loop and waits for its answer.
fn dispatch(request: Request, sender: &Sender<Message>) -> Response {
    let id = request.id.clone();
    let (reply, answer) = mpsc::channel();
    if sender.send(Message::Request { request, reply }).is_err() {
        error!("Event loop is gone; rejecting request");
        return Response::error(id, "unavailable", "daemon event loop stopped");
    }

    match answer.recv_timeout(Duration::from_secs(RESPONSE_TIMEOUT_SECS)) {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "Timed out waiting for event loop");
            Response::error(id, "timeout", "daemon did not answer in time")
        }
    }
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
