//! Error taxonomy for the relay pipeline.

/// Failures raised while relaying one inbound chat message.
///
/// Authentication and thread-fetch failures happen before anything is visible in
/// the chat. Stream failures happen after the placeholder card exists and are
/// recorded in the relay outcome instead of bubbling up.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Tenant access token issuance failed.
    #[error("tenant access token request failed: {0}")]
    Auth(String),

    /// Thread reconstruction failed at `message_id`.
    #[error("failed to fetch message {message_id}: {source}")]
    Fetch {
        message_id: String,
        #[source]
        source: Box<RelayError>,
    },

    /// The completion backend answered with a non-success status.
    #[error("completion backend returned {status}: {body}")]
    Upstream { status: u16, body: String },

    /// A stream record did not start with the `data: ` prefix.
    #[error("malformed stream record: {0}")]
    StreamProtocol(String),

    /// The stream carried an explicit error payload.
    #[error("completion stream reported an error: {0}")]
    StreamUpstream(String),

    /// A chat platform call failed.
    #[error("chat platform call failed with {status}: {body}")]
    Gateway { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RelayError {
    /// Wraps `self` as the cause of a failed thread fetch at `message_id`.
    /// Authentication failures stay as they are.
    pub fn at_message(self, message_id: impl Into<String>) -> Self {
        if matches!(self, RelayError::Auth(_)) {
            return self;
        }
        RelayError::Fetch {
            message_id: message_id.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Decode(err.to_string())
    }
}
