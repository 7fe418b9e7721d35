use async_trait::async_trait;

use crate::core::error::TransportError;
use crate::core::message::ConversationId;

/// A message on the display surface that can be edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub conversation_id: ConversationId,
    pub message_id: i64,
}

/// The chat surface the pipeline writes to: a messaging platform, a terminal, a test double.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Post the initial, still empty reply message.
    async fn send_placeholder(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<MessageHandle, TransportError>;

    /// Replace the text of a posted message. Fails with
    /// [`TransportError::EditConflict`] when `text` equals the current text.
    async fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<MessageHandle, TransportError>;

    async fn report_error(&self, conversation_id: &ConversationId, detail: &str);
}
