//! Incremental decoding of an OpenAI-style server-sent event stream.

use crate::error::RelayError;
use serde::Deserialize;
use serde_json::Value;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseRecord {
    /// A text fragment from `choices[0].delta.content` (may be empty).
    Delta(String),
    /// The `[DONE]` sentinel.
    Done,
    /// A record whose JSON could not be parsed; already logged.
    Skipped,
}

#[derive(Debug, Deserialize)]
struct StreamChunkResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Splits raw bytes into complete records on blank-line boundaries.
///
/// Records may straddle chunk boundaries, including in the middle of a
/// multi-byte character; bytes are only decoded once a record is complete.
/// Runs of extra newlines between records produce no empty records.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete record, without its delimiter.
    pub fn next_record(&mut self) -> Option<String> {
        loop {
            let (end, delimiter_len) = find_blank_line(&self.buffer)?;
            let record: Vec<u8> = self.buffer.drain(..end + delimiter_len).take(end).collect();
            let record = String::from_utf8_lossy(&record);
            let record = record.trim_matches(|c| c == '\r' || c == '\n');
            if !record.is_empty() {
                return Some(record.to_string());
            }
        }
    }

    /// Whatever remains once the byte stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = String::from_utf8_lossy(&rest);
        let rest = rest.trim_matches(|c| c == '\r' || c == '\n');
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Interpret one record.
///
/// A record that does not start with `data: ` is a protocol error. A JSON
/// payload with an `error` member is an upstream error. Unparseable JSON is
/// logged and reported as [`SseRecord::Skipped`].
pub fn parse_record(record: &str) -> Result<SseRecord, RelayError> {
    let Some(payload) = record.strip_prefix(DATA_PREFIX) else {
        return Err(RelayError::StreamProtocol(crate::util::truncate_with_ellipsis(
            record, 120,
        )));
    };
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return Ok(SseRecord::Done);
    }

    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                "Relay: skipping unparseable stream record ({e}): {}",
                crate::util::truncate_with_ellipsis(payload, 120)
            );
            return Ok(SseRecord::Skipped);
        }
    };

    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string());
        return Err(RelayError::StreamUpstream(message));
    }

    let chunk: StreamChunkResponse = match serde_json::from_value(value) {
        Ok(chunk) => chunk,
        Err(e) => {
            tracing::warn!("Relay: skipping stream record with unexpected shape: {e}");
            return Ok(SseRecord::Skipped);
        }
    };

    let fragment = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default();
    Ok(SseRecord::Delta(fragment))
}
