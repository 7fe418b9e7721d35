//! A [`ChatTransport`] that streams replies to a line-oriented terminal.
//!
//! A terminal cannot rewrite text already printed, so each edit only prints
//! the lines that became complete since the previous edit. The unfinished last
//! line (which may carry a synthetic code closer) is printed once the reply is
//! finished.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::core::error::TransportError;
use crate::core::message::ConversationId;
use crate::core::render::RESERVED_CHARS;
use crate::core::transport::{ChatTransport, MessageHandle};

const REPLY_PREFIX: &str = "bot> ";

/// Drop the markup escapes added for chat platforms.
pub fn strip_markup_escapes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(&next) = chars.peek() {
                if next == '\\' || next == '`' || RESERVED_CHARS.contains(&next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(ch);
    }
    out
}

struct LiveMessage {
    handle: MessageHandle,
    /// Raw display text of the last accepted edit.
    current: String,
    /// Plain text already written to the terminal.
    printed: String,
}

struct TerminalState<W> {
    out: W,
    next_message_id: i64,
    live: Option<LiveMessage>,
}

impl<W: Write> TerminalState<W> {
    fn finish_live(&mut self) -> std::io::Result<()> {
        let Some(message) = self.live.take() else {
            return Ok(());
        };
        let plain = strip_markup_escapes(&message.current);
        match plain.strip_prefix(message.printed.as_str()) {
            Some(tail) => write!(self.out, "{tail}")?,
            None => write!(self.out, "\n{REPLY_PREFIX}{plain}")?,
        }
        writeln!(self.out)?;
        self.out.flush()
    }
}

pub struct TerminalTransport<W> {
    state: Mutex<TerminalState<W>>,
}

impl<W: Write + Send> TerminalTransport<W> {
    pub fn new(out: W) -> Self {
        Self {
            state: Mutex::new(TerminalState {
                out,
                next_message_id: 1,
                live: None,
            }),
        }
    }

    /// Print whatever is left of the reply being streamed and end its line.
    pub fn finish(&self) -> std::io::Result<()> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish_live()
    }
}

fn delivery(err: std::io::Error) -> TransportError {
    TransportError::Delivery(err.to_string())
}

#[async_trait]
impl<W: Write + Send> ChatTransport for TerminalTransport<W> {
    async fn send_placeholder(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<MessageHandle, TransportError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.finish_live().map_err(delivery)?;

        let handle = MessageHandle {
            conversation_id: conversation_id.clone(),
            message_id: state.next_message_id,
        };
        state.next_message_id += 1;
        write!(state.out, "{REPLY_PREFIX}").map_err(delivery)?;
        state.out.flush().map_err(delivery)?;
        state.live = Some(LiveMessage {
            handle: handle.clone(),
            current: String::new(),
            printed: String::new(),
        });
        Ok(handle)
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        let message = match state.live.as_mut() {
            Some(message) if message.handle == *handle => message,
            _ => {
                return Err(TransportError::Delivery(format!(
                    "message {} is no longer on screen",
                    handle.message_id
                )))
            }
        };
        if message.current == text {
            return Err(TransportError::EditConflict);
        }
        message.current = text.to_string();

        let plain = strip_markup_escapes(text);
        let complete = match plain.rfind('\n') {
            Some(index) => &plain[..=index],
            None => "",
        };
        // Lines already printed are never rewritten.
        if let Some(fresh) = complete.strip_prefix(message.printed.as_str()) {
            if !fresh.is_empty() {
                write!(state.out, "{fresh}").map_err(delivery)?;
                state.out.flush().map_err(delivery)?;
                message.printed = complete.to_string();
            }
        }
        Ok(handle.clone())
    }

    async fn report_error(&self, conversation_id: &ConversationId, detail: &str) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = writeln!(state.out, "\n[{conversation_id}] error: {detail}");
        let _ = state.out.flush();
    }
}

#[cfg(test)]
impl TerminalTransport<Vec<u8>> {
    pub fn contents(&self) -> String {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&state.out).into_owned()
    }
}
