//! Client helper for talking to the sentinel daemon.
//!
//! One request per connection. Failures are surfaced to the caller as
//! strings; there is no offline fallback.

use sentinel_daemon_protocol::{
    EventAck, Method, Request, Response, MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

pub const SOCKET_ENV: &str = "SENTINEL_DAEMON_SOCKET";
const SOCKET_NAME: &str = "daemon.sock";
const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket: PathBuf,
}

impl DaemonClient {
    pub fn new(socket: PathBuf) -> Self {
        Self { socket }
    }

    /// Explicit path, then `SENTINEL_DAEMON_SOCKET`, then
    /// `~/.sentinel/daemon.sock`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, String> {
        if let Some(path) = explicit {
            return Ok(Self::new(path));
        }
        if let Some(path) = env::var_os(SOCKET_ENV).filter(|value| !value.is_empty()) {
            return Ok(Self::new(PathBuf::from(path)));
        }
        let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
        Ok(Self::new(home.join(".sentinel").join(SOCKET_NAME)))
    }

    pub fn socket(&self) -> &PathBuf {
        &self.socket
    }

    /// Sends one request and returns the response `data`, or the daemon's
    /// error as `code: message`.
    pub fn call(&self, method: Method, params: Option<Value>) -> Result<Value, String> {
        let request = Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: None,
            params,
        };
        let response = self.send_request(&request)?;
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

    pub fn send_event(&self, envelope: Value) -> Result<EventAck, String> {
        let data = self.call(Method::Event, Some(envelope))?;
        serde_json::from_value(data).map_err(|err| format!("Unexpected event ack: {}", err))
    }

    pub fn health(&self) -> Option<bool> {
        let data = self.call(Method::GetHealth, None).ok()?;
        let status = data.get("status").and_then(|value| value.as_str());
        Some(matches!(status, Some("ok")))
    }

    fn send_request(&self, request: &Request) -> Result<Response, String> {
        let mut stream = self.connect_with_retry()?;
        let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
        let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

        serde_json::to_writer(&mut stream, request)
            .map_err(|err| format!("Failed to write request: {}", err))?;
        stream
            .write_all(b"\n")
            .map_err(|err| format!("Failed to flush request: {}", err))?;
        stream.flush().ok();

        read_response(&mut stream)
    }

    /// Only the connect is retried: once a request is written the daemon may
    /// already have ingested it.
    fn connect_with_retry(&self) -> Result<UnixStream, String> {
        match UnixStream::connect(&self.socket) {
            Ok(stream) => Ok(stream),
            Err(err) => {
                tracing::debug!(
                    error = %err,
                    socket = %self.socket.display(),
                    "Daemon connect failed; retrying once"
                );
                std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
                UnixStream::connect(&self.socket).map_err(|retry_err| {
                    format!(
                        "Failed to connect to daemon socket {}: {}",
                        self.socket.display(),
                        retry_err
                    )
                })
            }
        }
    }
}

fn read_response(stream: &mut UnixStream) -> Result<Response, String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES * 4 {
                    return Err("Response exceeded maximum size".to_string());
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
                return Err("Timed out waiting for daemon response".to_string());
            }
            Err(err) => return Err(format!("Failed to read response: {}", err)),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err("Daemon response was empty".to_string());
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| format!("Failed to parse response JSON: {}", err))
}
