//! Streams a completion into one live-edited interactive card.
//!
//! A relay creates a placeholder card, patches it with the accumulated text
//! (plus a status footer) as deltas arrive, and always ends with a single
//! footer-less patch. The final patch is owned by [`FinalizeGuard`]: it runs
//! from [`FinalizeGuard::finish`] on every normal exit path and from `Drop`
//! when the relay future is cancelled mid-stream.

use super::sse::{parse_record, SseDecoder, SseRecord};
use crate::channels::{Card, MessageBody, MessageGateway};
use crate::error::RelayError;
use crate::providers::ByteStream;
use futures_util::StreamExt;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_STATUS_FOOTER: &str = "Generating...";

/// How the streaming phase ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The `[DONE]` sentinel arrived.
    Completed,
    /// The byte stream ended without a sentinel.
    Exhausted,
    /// A record did not carry the `data: ` prefix.
    ProtocolError(String),
    /// The backend reported an error inside the stream.
    UpstreamError(String),
    /// The byte stream itself failed.
    Interrupted(String),
    /// Patching the card failed; streaming stopped early.
    PatchFailed(String),
    Cancelled,
    TimedOut,
}

impl StreamEnd {
    pub fn is_clean(&self) -> bool {
        matches!(self, StreamEnd::Completed | StreamEnd::Exhausted)
    }
}

/// Result of one relay invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// The placeholder card that was created and edited.
    pub message_id: String,
    /// Text of the final patch.
    pub text: String,
    pub end: StreamEnd,
    /// Whether the final footer-less patch was accepted.
    pub finalized: bool,
}

#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Text of the placeholder card before any delta arrives.
    pub placeholder_text: String,
    /// Transient footer shown while the answer is still streaming.
    pub status_footer: String,
    /// Upper bound on the streaming phase.
    pub stream_timeout: Option<Duration>,
    /// Minimum spacing between intermediate patches; zero patches on every delta.
    pub patch_interval: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            placeholder_text: String::new(),
            status_footer: DEFAULT_STATUS_FOOTER.into(),
            stream_timeout: None,
            patch_interval: Duration::ZERO,
        }
    }
}

/// Owns the placeholder card between creation and the final patch.
struct FinalizeGuard {
    gateway: Arc<dyn MessageGateway>,
    message_id: String,
    text: String,
    armed: bool,
}

impl FinalizeGuard {
    fn new(gateway: Arc<dyn MessageGateway>, message_id: String) -> Self {
        Self {
            gateway,
            message_id,
            text: String::new(),
            armed: true,
        }
    }

    /// Issue the final patch. Consumes the guard so it can run only once.
    async fn finish(mut self) -> (String, bool) {
        self.armed = false;
        let text = std::mem::take(&mut self.text);
        let finalized = finalize(self.gateway.as_ref(), &self.message_id, &text).await;
        (text, finalized)
    }
}

impl Drop for FinalizeGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let gateway = Arc::clone(&self.gateway);
        let message_id = std::mem::take(&mut self.message_id);
        let text = std::mem::take(&mut self.text);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!("Relay: relay dropped mid-stream, finalizing {message_id} in background");
                handle.spawn(async move {
                    finalize(gateway.as_ref(), &message_id, &text).await;
                });
            }
            Err(_) => {
                tracing::warn!("Relay: no runtime to finalize {message_id}; footer left in place");
            }
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Best-effort final patch: failures are logged, never raised.
async fn finalize(gateway: &dyn MessageGateway, message_id: &str, text: &str) -> bool {
    match gateway.patch_message(message_id, &Card::new(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("Relay: final patch of {message_id} failed: {e}");
            false
        }
    }
}

pub struct StreamRelay {
    gateway: Arc<dyn MessageGateway>,
    options: StreamOptions,
}

impl StreamRelay {
    pub fn new(gateway: Arc<dyn MessageGateway>, options: StreamOptions) -> Self {
        Self { gateway, options }
    }

    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn streaming_card(&self, text: &str) -> Card {
        Card::new(text).with_footer(self.options.status_footer.clone())
    }

    /// Relay `stream` into a new card in `chat_id`, optionally as a reply.
    ///
    /// Fails only if the placeholder cannot be created. Once it exists, every
    /// outcome (including cancellation through `cancel`) is reported through
    /// [`RelayOutcome::end`] after the final patch has been attempted.
    pub async fn run(
        &self,
        chat_id: &str,
        reply_to: Option<&str>,
        stream: ByteStream,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        let placeholder = self.streaming_card(&self.options.placeholder_text);
        let message_id = self
            .gateway
            .send_message(chat_id, &MessageBody::Card(placeholder), reply_to)
            .await?;
        tracing::info!("Relay: streaming into card {message_id}");

        let mut guard = FinalizeGuard::new(Arc::clone(&self.gateway), message_id.clone());

        let end = self.consume(&mut guard, stream, cancel).await;

        if !end.is_clean() {
            tracing::warn!("Relay: streaming into {message_id} ended early: {end:?}");
        }

        let (text, finalized) = guard.finish().await;
        Ok(RelayOutcome {
            message_id,
            text,
            end,
            finalized,
        })
    }

    /// Drive the stream until it ends, fails, is cancelled or times out.
    ///
    /// Cancellation and the deadline are only observed between records, so an
    /// intermediate patch is never abandoned mid-flight and cannot land after
    /// the final one.
    async fn consume(
        &self,
        guard: &mut FinalizeGuard,
        mut stream: ByteStream,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        let deadline = self.options.stream_timeout.map(|limit| Instant::now() + limit);
        let mut decoder = SseDecoder::default();
        let mut last_patch: Option<Instant> = None;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamEnd::Cancelled,
                () = deadline_reached(deadline) => return StreamEnd::TimedOut,
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return StreamEnd::Interrupted(e.to_string()),
            };
            decoder.push(&bytes);
            while let Some(record) = decoder.next_record() {
                if cancel.is_cancelled() {
                    return StreamEnd::Cancelled;
                }
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    return StreamEnd::TimedOut;
                }
                if let ControlFlow::Break(end) = self.apply(guard, &record, &mut last_patch).await {
                    return end;
                }
            }
        }

        if let Some(record) = decoder.finish() {
            if let ControlFlow::Break(end) = self.apply(guard, &record, &mut last_patch).await {
                return end;
            }
        }
        StreamEnd::Exhausted
    }

    async fn apply(
        &self,
        guard: &mut FinalizeGuard,
        record: &str,
        last_patch: &mut Option<Instant>,
    ) -> ControlFlow<StreamEnd> {
        let fragment = match parse_record(record) {
            Ok(SseRecord::Done) => return ControlFlow::Break(StreamEnd::Completed),
            Ok(SseRecord::Skipped) => return ControlFlow::Continue(()),
            Ok(SseRecord::Delta(fragment)) => fragment,
            Err(RelayError::StreamUpstream(message)) => {
                return ControlFlow::Break(StreamEnd::UpstreamError(message))
            }
            Err(e) => return ControlFlow::Break(StreamEnd::ProtocolError(e.to_string())),
        };
        if fragment.is_empty() {
            return ControlFlow::Continue(());
        }

        guard.text.push_str(&fragment);

        let interval = self.options.patch_interval;
        let due = last_patch.map_or(true, |at| at.elapsed() >= interval);
        if !due {
            return ControlFlow::Continue(());
        }

        let card = self.streaming_card(&guard.text);
        if let Err(e) = self.gateway.patch_message(&guard.message_id, &card).await {
            return ControlFlow::Break(StreamEnd::PatchFailed(e.to_string()));
        }
        *last_patch = Some(Instant::now());
        ControlFlow::Continue(())
    }
}
