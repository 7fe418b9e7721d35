//! Per-turn orchestration: memory, backend stream, renderer and edit scheduler.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::api::GenerationParams;
use crate::core::backend::{open_stream, Fragment, StreamBackend, StreamRequest};
use crate::core::error::{BackendError, PipelineError};
use crate::core::memory::ConversationStore;
use crate::core::message::ConversationId;
use crate::core::render::render;
use crate::core::scheduler::{EditScheduler, StreamSession, DEFAULT_EDIT_INTERVAL};
use crate::core::transport::{ChatTransport, MessageHandle};

/// Shown in place of a reply when a turn fails before any text was displayed.
pub const FAILURE_NOTICE: &str = "Sorry, something went wrong while generating a reply.";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub edit_interval: Duration,
    /// Mention of the bot stripped from incoming text, e.g. `@relay_bot`.
    pub bot_username: Option<String>,
    pub generation: GenerationParams,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            edit_interval: DEFAULT_EDIT_INTERVAL,
            bot_username: None,
            generation: GenerationParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    AwaitingFirstFragment,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { text: String },
    Failed { partial: String, error: PipelineError },
    Cancelled,
}

enum Wake {
    Cancelled,
    Fragment(Fragment),
    FlushDue,
}

fn transition(conversation_id: &ConversationId, state: &mut TurnState, next: TurnState) {
    debug!(conversation = %conversation_id, from = ?*state, to = ?next, "turn state");
    *state = next;
}

pub struct Pipeline {
    store: Arc<ConversationStore>,
    backend: RwLock<Arc<dyn StreamBackend>>,
    transport: Arc<dyn ChatTransport>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        store: Arc<ConversationStore>,
        backend: Arc<dyn StreamBackend>,
        transport: Arc<dyn ChatTransport>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            backend: RwLock::new(backend),
            transport,
            settings,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The backend used by turns started from now on.
    pub fn backend(&self) -> Arc<dyn StreamBackend> {
        Arc::clone(&self.backend.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap the backend. Turns already streaming keep the one they started with.
    pub fn set_backend(&self, backend: Arc<dyn StreamBackend>) {
        info!(backend = %backend.kind(), "backend replaced");
        *self.backend.write().unwrap_or_else(PoisonError::into_inner) = backend;
    }

    fn strip_mention(&self, text: &str) -> String {
        match self.settings.bot_username.as_deref() {
            Some(username) if !username.is_empty() => {
                text.replacen(username, "", 1).trim_start().to_string()
            }
            _ => text.to_string(),
        }
    }

    /// Clear a conversation's history. Returns whether there was any.
    pub fn wipe_history(&self, conversation_id: &ConversationId) -> bool {
        let wiped = self.store.clear(conversation_id);
        info!(conversation = %conversation_id, wiped, "history wipe requested");
        wiped
    }

    pub async fn handle_user_turn(&self, conversation_id: &ConversationId, text: &str) -> TurnOutcome {
        self.handle_user_turn_until(conversation_id, text, &CancellationToken::new())
            .await
    }

    /// Run one turn until it completes, fails, or `cancel` fires. Cancelling
    /// closes the backend stream, stops further display updates, and leaves
    /// the reply placeholder in memory empty.
    pub async fn handle_user_turn_until(
        &self,
        conversation_id: &ConversationId,
        text: &str,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut state = TurnState::Idle;
        let text = self.strip_mention(text);
        debug!(conversation = %conversation_id, message = %text, "user message");

        let handle = match self.transport.send_placeholder(conversation_id).await {
            Ok(handle) => handle,
            Err(error) => {
                transition(conversation_id, &mut state, TurnState::Failed);
                return self
                    .fail(conversation_id, None, String::new(), error.into())
                    .await;
            }
        };

        transition(conversation_id, &mut state, TurnState::AwaitingFirstFragment);
        let backend = self.backend();
        let kind = backend.kind();
        let prepared = self
            .store
            .append_user_turn(conversation_id, &text)
            .and_then(|pending| {
                let input = self.store.render_prompt(conversation_id, kind.prompt_style())?;
                Ok((pending, input))
            });
        let (pending, input) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                transition(conversation_id, &mut state, TurnState::Failed);
                return self
                    .fail(conversation_id, Some(&handle), String::new(), error.into())
                    .await;
            }
        };
        trace!(conversation = %conversation_id, prompt = ?input, "rendered prompt");

        let request = StreamRequest {
            input,
            params: self.settings.generation.clone(),
        };
        let mut stream = open_stream(backend, request);
        let scheduler = EditScheduler::new(Arc::clone(&self.transport), self.settings.edit_interval);
        let mut session = StreamSession::new(conversation_id.clone(), handle, kind.update_mode());

        loop {
            let deadline = session.flush_deadline(scheduler.interval());
            let dirty = session.is_dirty();
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                fragment = stream.next() => Wake::Fragment(
                    fragment.unwrap_or(Fragment::Error(BackendError::ConnectionClosed)),
                ),
                _ = tokio::time::sleep_until(deadline), if dirty => Wake::FlushDue,
            };

            let fragment = match wake {
                Wake::Cancelled => {
                    info!(conversation = %conversation_id, "turn cancelled");
                    return TurnOutcome::Cancelled;
                }
                Wake::FlushDue => {
                    scheduler.on_tick(&mut session).await;
                    continue;
                }
                Wake::Fragment(fragment) => fragment,
            };

            if state == TurnState::AwaitingFirstFragment {
                transition(conversation_id, &mut state, TurnState::Streaming);
            }

            match fragment {
                Fragment::Text(delta) => {
                    scheduler.on_fragment(&mut session, &delta).await;
                }
                Fragment::End => {
                    scheduler.on_stream_end(&mut session).await;
                    transition(conversation_id, &mut state, TurnState::Completed);
                    let text = session.into_text();
                    debug!(conversation = %conversation_id, response = %text, "reply completed");
                    self.store.complete_reply(conversation_id, pending, &text);
                    return TurnOutcome::Completed { text };
                }
                Fragment::Error(error) => {
                    scheduler.on_stream_end(&mut session).await;
                    transition(conversation_id, &mut state, TurnState::Failed);
                    let shown = session.has_shown_text();
                    let handle = session.handle().clone();
                    let partial = session.into_text();
                    let notice_target = (!shown).then_some(&handle);
                    return self
                        .fail(conversation_id, notice_target, partial, error.into())
                        .await;
                }
            }
        }
    }

    async fn fail(
        &self,
        conversation_id: &ConversationId,
        notice_target: Option<&MessageHandle>,
        partial: String,
        error: PipelineError,
    ) -> TurnOutcome {
        warn!(conversation = %conversation_id, "turn failed: {error}");
        self.transport
            .report_error(conversation_id, &error.to_string())
            .await;

        if let Some(handle) = notice_target {
            let notice = render(FAILURE_NOTICE).display_text();
            if let Err(err) = self.transport.edit_message(handle, &notice).await {
                debug!(conversation = %conversation_id, "could not show failure notice: {err}");
            }
        }

        TurnOutcome::Failed { partial, error }
    }
}
