//! Flattening of stored message bodies into prompt text.
//!
//! Messages fetched back from the platform carry `body.content` as a JSON
//! document whose shape depends on the message type. Three shapes are
//! understood: plain text (`{"text": ...}`), element grids (`{"elements": [[run, ...], ...]}`
//! or rich-text `{"content": [[run, ...], ...]}`), and titled cards (`{"title": ...}`).
//! Anything else falls back to the raw payload.

use serde_json::Value;

/// Extract prompt text from a raw `body.content` payload.
pub fn extract_text(raw: &str) -> String {
    let parsed = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("Lark: message content is not JSON, using raw payload");
            return raw.to_string();
        }
    };

    if let Some(text) = parsed.get("text").and_then(Value::as_str) {
        return text.to_string();
    }

    if let Some(grid) = element_grid(&parsed) {
        return grid;
    }

    if let Some(title) = parsed
        .get("title")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
    {
        return title.to_string();
    }

    tracing::warn!("Lark: unrecognized message content shape, using raw payload");
    raw.to_string()
}

/// Rows of text runs. Runs inside a row and the rows themselves are both newline-joined.
fn element_grid(parsed: &Value) -> Option<String> {
    let rows = parsed
        .get("elements")
        .or_else(|| parsed.get("content"))
        .and_then(Value::as_array)?;

    let mut lines = Vec::with_capacity(rows.len());
    for row in rows {
        let runs = row.as_array()?;
        let line = runs.iter().filter_map(run_text).collect::<Vec<_>>().join("\n");
        lines.push(line);
    }

    let text = lines.join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn run_text(run: &Value) -> Option<&str> {
    match run.get("tag").and_then(Value::as_str).unwrap_or("text") {
        "a" => run
            .get("text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| run.get("href").and_then(Value::as_str)),
        "at" => run
            .get("user_name")
            .and_then(Value::as_str)
            .or_else(|| run.get("user_id").and_then(Value::as_str)),
        _ => run.get("text").and_then(Value::as_str),
    }
}
