//! Interactive card payloads used for the live-edited answer message.

use serde_json::{json, Value};

/// A single-block markdown card with an optional status footer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub text: String,
    pub footer: Option<String>,
}

impl Card {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            footer: None,
        }
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    pub fn has_footer(&self) -> bool {
        self.footer.is_some()
    }

    pub fn to_json(&self) -> Value {
        let mut elements = vec![json!({
            "tag": "div",
            "text": { "content": self.text, "tag": "lark_md" }
        })];
        if let Some(footer) = &self.footer {
            elements.push(json!({
                "tag": "note",
                "elements": [{ "tag": "plain_text", "content": footer }]
            }));
        }
        json!({
            "config": { "wide_screen_mode": true },
            "elements": elements
        })
    }

    /// Body for `PATCH /im/v1/messages/{id}`.
    pub fn patch_body(&self) -> Value {
        json!({ "content": self.to_json().to_string() })
    }

    /// Inverse of [`Self::to_json`]; returns `None` for cards of any other shape.
    pub fn from_json(value: &Value) -> Option<Self> {
        let elements = value.get("elements")?.as_array()?;
        let text = elements
            .iter()
            .find(|el| el.get("tag").and_then(Value::as_str) == Some("div"))?
            .pointer("/text/content")?
            .as_str()?
            .to_string();
        let footer = elements
            .iter()
            .find(|el| el.get("tag").and_then(Value::as_str) == Some("note"))
            .and_then(|note| note.pointer("/elements/0/content"))
            .and_then(Value::as_str)
            .map(String::from);
        Some(Self { text, footer })
    }
}
