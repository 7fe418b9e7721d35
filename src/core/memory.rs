//! Per-conversation turn history.
//!
//! Each conversation sits behind its own lock, so turns for different
//! conversations never contend; the outer map lock is only held long enough to
//! find or create an entry. Entries live for the whole process: clearing a
//! conversation empties it in place and bumps its epoch, which lets a reply
//! that was still streaming during a wipe notice that its placeholder is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::core::error::TemplateNotFound;
use crate::core::message::{ConversationId, Turn};
use crate::core::templates::{PromptRendering, PromptStyle, Template, TemplateSet};

#[derive(Debug, Default)]
struct Conversation {
    turns: Vec<Turn>,
    epoch: u64,
}

/// Identifies the assistant placeholder reserved by one `append_user_turn` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReply {
    epoch: u64,
    index: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct ConversationStore {
    templates: TemplateSet,
    active_template: String,
    conversations: Mutex<HashMap<ConversationId, Arc<Mutex<Conversation>>>>,
}

impl ConversationStore {
    pub fn new(templates: TemplateSet, active_template: impl Into<String>) -> Self {
        Self {
            templates,
            active_template: active_template.into(),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn active_template(&self) -> Result<&Template, TemplateNotFound> {
        self.templates.get(&self.active_template)
    }

    fn entry(&self, id: &ConversationId) -> Arc<Mutex<Conversation>> {
        let mut conversations = lock(&self.conversations);
        Arc::clone(conversations.entry(id.clone()).or_default())
    }

    fn existing(&self, id: &ConversationId) -> Option<Arc<Mutex<Conversation>>> {
        lock(&self.conversations).get(id).cloned()
    }

    /// Record a user turn followed by an empty assistant placeholder. A new
    /// conversation starts with the active template's system turn.
    pub fn append_user_turn(
        &self,
        id: &ConversationId,
        text: &str,
    ) -> Result<PendingReply, TemplateNotFound> {
        let template = self.active_template()?;
        let conversation = self.entry(id);
        let mut conversation = lock(&conversation);

        if conversation.turns.is_empty() {
            debug!(conversation = %id, template = %template.name, "starting conversation");
            conversation
                .turns
                .push(Turn::system(template.system_prompt.clone()));
        }
        conversation.turns.push(Turn::user(text));
        conversation.turns.push(Turn::placeholder());

        Ok(PendingReply {
            epoch: conversation.epoch,
            index: conversation.turns.len() - 1,
        })
    }

    /// Fill the placeholder reserved for `pending`. Returns false when the
    /// conversation was cleared in the meantime and the reply was dropped.
    pub fn complete_reply(&self, id: &ConversationId, pending: PendingReply, text: &str) -> bool {
        let Some(conversation) = self.existing(id) else {
            return false;
        };
        let mut conversation = lock(&conversation);

        if conversation.epoch != pending.epoch {
            debug!(conversation = %id, "history was wiped while streaming; dropping reply");
            return false;
        }
        match conversation.turns.get_mut(pending.index) {
            Some(turn) if turn.is_placeholder() => {
                turn.content = text.to_string();
                trace!(conversation = %id, turns = ?conversation.turns, "conversation updated");
                true
            }
            _ => {
                drop(conversation);
                self.complete_assistant_turn(id, text)
            }
        }
    }

    /// Set the trailing assistant placeholder to `text`. Without a trailing
    /// placeholder the text is appended as a new assistant turn instead.
    pub fn complete_assistant_turn(&self, id: &ConversationId, text: &str) -> bool {
        let Some(conversation) = self.existing(id) else {
            debug!(conversation = %id, "completion for unknown conversation ignored");
            return false;
        };
        let mut conversation = lock(&conversation);

        if conversation.turns.is_empty() {
            debug!(conversation = %id, "completion for empty conversation ignored");
            return false;
        }
        match conversation.turns.last_mut() {
            Some(turn) if turn.is_placeholder() => turn.content = text.to_string(),
            _ => {
                debug!(conversation = %id, "no pending placeholder; appending assistant turn");
                conversation.turns.push(Turn::assistant(text));
            }
        }
        trace!(conversation = %id, turns = ?conversation.turns, "conversation updated");
        true
    }

    pub fn render_prompt(
        &self,
        id: &ConversationId,
        style: PromptStyle,
    ) -> Result<PromptRendering, TemplateNotFound> {
        let template = self.active_template()?;
        let conversation = self.entry(id);
        let conversation = lock(&conversation);
        Ok(template.render(&conversation.turns, style))
    }

    /// Remove every turn of the conversation. Returns whether there was anything to remove.
    pub fn clear(&self, id: &ConversationId) -> bool {
        let Some(conversation) = self.existing(id) else {
            return false;
        };
        let mut conversation = lock(&conversation);
        let had_history = !conversation.turns.is_empty();
        conversation.turns.clear();
        conversation.epoch += 1;
        had_history
    }

    pub fn has_history(&self, id: &ConversationId) -> bool {
        self.existing(id)
            .is_some_and(|conversation| !lock(&conversation).turns.is_empty())
    }

    pub fn turns(&self, id: &ConversationId) -> Vec<Turn> {
        self.existing(id)
            .map(|conversation| lock(&conversation).turns.clone())
            .unwrap_or_default()
    }
}
