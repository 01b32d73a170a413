//! Sentinel daemon entrypoint.
//!
//! A small, single-writer service that hosts one live feed. Gateway events are
//! forwarded over a Unix socket; dashboards and the CLI query the same socket
//! for snapshots, stats and run lists.

use fs_err as fs;
use serde::Serialize;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sentinel_daemon_protocol::{
    event_envelope, parse_event_query, ErrorInfo, EventAck, Method, Request, Response,
    ERROR_TOO_MANY_CONNECTIONS, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use sentinel_feed::LiveFeed;

mod config;
mod state;

use state::{DaemonState, MAX_ACTIVE_CONNECTIONS};

const READ_TIMEOUT_SECS: u64 = 2;
const WRITE_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;

fn main() {
    init_logging();

    let daemon_config = match config::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load config; using defaults");
            config::DaemonConfig::default()
        }
    };

    let socket_path = match config::resolve_socket_path(&daemon_config) {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let feed = match LiveFeed::with_config(&daemon_config.feed) {
        Ok(feed) => feed,
        Err(err) => {
            error!(error = %err, "Failed to build live feed from config");
            std::process::exit(1);
        }
    };
    let shared_state = Arc::new(DaemonState::new(feed));

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    info!(
        path = %socket_path.display(),
        buffer_capacity = daemon_config.feed.buffer_capacity,
        extra_risk_rules = daemon_config.feed.risk_rules.len(),
        "Sentinel daemon started"
    );

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => match shared_state.try_acquire_connection() {
                Some(permit) => {
                    let state = Arc::clone(&shared_state);
                    thread::spawn(move || {
                        let _permit = permit;
                        handle_connection(stream, state);
                    });
                }
                None => reject_connection(stream),
            },
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("SENTINEL_DEBUG_LOG")
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

fn reject_connection(mut stream: UnixStream) {
    warn!(
        max_active_connections = MAX_ACTIVE_CONNECTIONS,
        "Rejecting connection; too many active connections"
    );
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));
    let response = Response::error(
        None,
        ERROR_TOO_MANY_CONNECTIONS,
        "daemon connection limit reached",
    );
    let _ = write_response(&mut stream, response);
}

fn handle_connection(mut stream: UnixStream, state: Arc<DaemonState>) {
    let _ = stream.set_write_timeout(Some(Duration::from_secs(WRITE_TIMEOUT_SECS)));
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
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
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
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

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
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

fn handle_request(request: Request, state: &DaemonState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    let feed = state.feed();
    match request.method {
        Method::GetHealth => serialize_response(request.id, "health", &state.health()),
        Method::Event => {
            let envelope = event_envelope(request.params);
            let sequence = feed.process_event(&envelope);
            debug!(sequence, "Event accepted");
            serialize_response(
                request.id,
                "event ack",
                &EventAck {
                    accepted: true,
                    sequence,
                },
            )
        }
        Method::GetSnapshot => match parse_event_query(request.params) {
            Ok(query) => {
                let snapshot = feed.snapshot(query.limit);
                debug!(
                    events = snapshot.recent_events.len(),
                    active_runs = snapshot.active_runs.len(),
                    "Feed snapshot"
                );
                serialize_response(request.id, "snapshot", &snapshot)
            }
            Err(err) => Response::error_with_info(request.id, err),
        },
        Method::GetStats => serialize_response(request.id, "stats", &feed.stats()),
        Method::GetRecentEvents => match parse_event_query(request.params) {
            Ok(query) => {
                serialize_response(request.id, "recent events", &feed.recent_events(query.limit))
            }
            Err(err) => Response::error_with_info(request.id, err),
        },
        Method::GetActiveRuns => {
            serialize_response(request.id, "active runs", &feed.active_runs())
        }
        Method::GetCompletedRuns => {
            serialize_response(request.id, "completed runs", &feed.completed_runs())
        }
    }
}

fn serialize_response<T: Serialize>(id: Option<String>, label: &str, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize {}: {}", label, err),
        ),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(method: Method, params: Option<serde_json::Value>) -> Request {
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("test".to_string()),
            params,
        }
    }

    #[test]
    fn rejects_protocol_mismatch() {
        let state = DaemonState::new(LiveFeed::new());
        let mut req = request(Method::GetStats, None);
        req.protocol_version = PROTOCOL_VERSION + 1;

        let response = handle_request(req, &state);
        assert!(!response.ok);
        assert_eq!(
            response.error.map(|err| err.code),
            Some("protocol_mismatch".to_string())
        );
    }

    #[test]
    fn event_then_snapshot() {
        let state = DaemonState::new(LiveFeed::new());
        let ack = handle_request(
            request(
                Method::Event,
                Some(json!({
                    "event": "agent",
                    "payload": { "runId": "r1", "data": { "delta": "Hi" } }
                })),
            ),
            &state,
        );
        assert!(ack.ok);
        assert_eq!(ack.data.as_ref().map(|data| data["sequence"].clone()), Some(json!(1)));

        let snapshot = handle_request(request(Method::GetSnapshot, Some(json!({ "limit": 5 }))), &state);
        let data = snapshot.data.expect("snapshot data");
        assert_eq!(data["activeRuns"][0]["runId"], "r1");
        assert_eq!(data["stats"]["totalEvents"], 1);
    }

    #[test]
    fn event_without_params_is_still_accepted() {
        let state = DaemonState::new(LiveFeed::new());
        let response = handle_request(request(Method::Event, None), &state);
        assert!(response.ok);

        let recent = handle_request(request(Method::GetRecentEvents, None), &state);
        let data = recent.data.expect("recent data");
        assert_eq!(data[0]["type"], "unknown");
    }

    #[test]
    fn invalid_limit_is_rejected() {
        let state = DaemonState::new(LiveFeed::new());
        let response = handle_request(
            request(Method::GetRecentEvents, Some(json!({ "limit": 0 }))),
            &state,
        );
        assert!(!response.ok);
        assert_eq!(
            response.error.map(|err| err.code),
            Some("invalid_params".to_string())
        );
    }
}
