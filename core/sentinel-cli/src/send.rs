//! `sentinel send`: forwards gateway envelopes from stdin to the daemon.
//!
//! Input is either one JSON document or newline-delimited JSON (one envelope
//! per line). Lines that are not valid JSON are forwarded as strings; the
//! feed records them as `unknown` events rather than dropping them.

use serde_json::Value;
use std::io::{self, Read};

use crate::daemon_client::DaemonClient;

pub fn run(client: &DaemonClient) -> Result<(), String> {
    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .map_err(|e| format!("Failed to read stdin: {}", e))?;

    let envelopes = parse_envelopes(&input);
    if envelopes.is_empty() {
        tracing::debug!("No envelopes on stdin");
        return Ok(());
    }

    for envelope in envelopes {
        let ack = client.send_event(envelope)?;
        println!("{}", ack.sequence);
    }
    Ok(())
}

pub fn parse_envelopes(input: &str) -> Vec<Value> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return vec![value];
    }

    trimmed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Forwarding non-JSON line as a string");
                Value::String(line.to_string())
            })
        })
        .collect()
}
