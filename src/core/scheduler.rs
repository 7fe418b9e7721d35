//! Rate-limited, coalescing display updates for one streamed reply.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::backend::UpdateMode;
use crate::core::error::TransportError;
use crate::core::message::ConversationId;
use crate::core::render::render;
use crate::core::transport::{ChatTransport, MessageHandle};

pub const DEFAULT_EDIT_INTERVAL: Duration = Duration::from_millis(500);

/// Per-turn streaming state, owned by the task handling that turn.
#[derive(Debug)]
pub struct StreamSession {
    conversation_id: ConversationId,
    handle: MessageHandle,
    mode: UpdateMode,
    accumulated_text: String,
    last_flushed_text: String,
    last_display: String,
    last_flush_time: Instant,
}

impl StreamSession {
    pub fn new(conversation_id: ConversationId, handle: MessageHandle, mode: UpdateMode) -> Self {
        Self {
            conversation_id,
            handle,
            mode,
            accumulated_text: String::new(),
            last_flushed_text: String::new(),
            last_display: String::new(),
            last_flush_time: Instant::now(),
        }
    }

    pub fn handle(&self) -> &MessageHandle {
        &self.handle
    }

    pub fn accumulated_text(&self) -> &str {
        &self.accumulated_text
    }

    /// Whether text has arrived since the last flush.
    pub fn is_dirty(&self) -> bool {
        self.accumulated_text != self.last_flushed_text
    }

    /// Whether any text has reached the display surface.
    pub fn has_shown_text(&self) -> bool {
        !self.last_display.is_empty()
    }

    pub fn flush_deadline(&self, interval: Duration) -> Instant {
        self.last_flush_time + interval
    }

    pub fn into_text(self) -> String {
        self.accumulated_text
    }

    fn apply(&mut self, fragment: &str) {
        match self.mode {
            UpdateMode::Append => self.accumulated_text.push_str(fragment),
            UpdateMode::Replace => {
                self.accumulated_text.clear();
                self.accumulated_text.push_str(fragment);
            }
        }
    }
}

pub struct EditScheduler {
    transport: Arc<dyn ChatTransport>,
    interval: Duration,
}

impl EditScheduler {
    pub fn new(transport: Arc<dyn ChatTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Take in one fragment. Returns whether the display was updated.
    pub async fn on_fragment(&self, session: &mut StreamSession, fragment: &str) -> bool {
        session.apply(fragment);
        match session.mode {
            UpdateMode::Replace => self.flush(session).await,
            UpdateMode::Append if session.last_flush_time.elapsed() >= self.interval => {
                self.flush(session).await
            }
            UpdateMode::Append => false,
        }
    }

    /// Flush pending text once the interval since the last flush has passed.
    pub async fn on_tick(&self, session: &mut StreamSession) -> bool {
        if session.is_dirty() && session.last_flush_time.elapsed() >= self.interval {
            self.flush(session).await
        } else {
            false
        }
    }

    /// Final flush, skipped when the last periodic flush already showed everything.
    pub async fn on_stream_end(&self, session: &mut StreamSession) -> bool {
        if session.is_dirty() {
            self.flush(session).await
        } else {
            false
        }
    }

    async fn flush(&self, session: &mut StreamSession) -> bool {
        let shown = render(&session.accumulated_text).display_text();
        if shown.is_empty() || shown == session.last_display {
            session.last_flushed_text.clone_from(&session.accumulated_text);
            return false;
        }

        let result = self.transport.edit_message(&session.handle, &shown).await;
        session.last_flush_time = Instant::now();
        match result {
            Ok(handle) => {
                debug!(
                    conversation = %session.conversation_id,
                    chars = shown.len(),
                    "flushed reply"
                );
                session.last_flushed_text.clone_from(&session.accumulated_text);
                session.handle = handle;
                session.last_display = shown;
                true
            }
            Err(TransportError::EditConflict) => {
                debug!(conversation = %session.conversation_id, "display already up to date");
                session.last_flushed_text.clone_from(&session.accumulated_text);
                session.last_display = shown;
                false
            }
            // The text stays dirty so the next tick or the stream end retries it.
            Err(err) => {
                warn!(conversation = %session.conversation_id, "failed to update reply: {err}");
                false
            }
        }
    }
}
