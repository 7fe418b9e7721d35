use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::backend::{
    BackendKind, Fragment, FragmentSink, StreamBackend, StreamRequest,
};
use crate::core::error::TransportError;
use crate::core::message::ConversationId;
use crate::core::transport::{ChatTransport, MessageHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEdit {
    pub message_id: i64,
    pub text: String,
    pub at: Instant,
}

/// In-memory display surface that records everything the pipeline does to it.
#[derive(Default)]
pub struct RecordingTransport {
    next_message_id: AtomicI64,
    texts: Mutex<HashMap<i64, String>>,
    placeholders: Mutex<Vec<ConversationId>>,
    edits: Mutex<Vec<RecordedEdit>>,
    errors: Mutex<Vec<(ConversationId, String)>>,
    edit_delay: Option<Duration>,
    fail_placeholders: bool,
    failing_edits: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every edit takes `delay` to complete, like a slow chat API.
    pub fn with_edit_delay(delay: Duration) -> Self {
        Self {
            edit_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn failing_placeholders() -> Self {
        Self {
            fail_placeholders: true,
            ..Self::default()
        }
    }

    /// The first `count` edits fail with a delivery error.
    pub fn failing_edits(count: usize) -> Self {
        Self {
            failing_edits: AtomicUsize::new(count),
            ..Self::default()
        }
    }

    pub fn set_text(&self, handle: &MessageHandle, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(handle.message_id, text.to_string());
    }

    pub fn edits(&self) -> Vec<String> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .map(|edit| edit.text.clone())
            .collect()
    }

    pub fn recorded_edits(&self) -> Vec<RecordedEdit> {
        self.edits.lock().unwrap().clone()
    }

    pub fn placeholders(&self) -> Vec<ConversationId> {
        self.placeholders.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<(ConversationId, String)> {
        self.errors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_placeholder(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<MessageHandle, TransportError> {
        if self.fail_placeholders {
            return Err(TransportError::Delivery("chat unavailable".to_string()));
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.placeholders
            .lock()
            .unwrap()
            .push(conversation_id.clone());
        Ok(MessageHandle {
            conversation_id: conversation_id.clone(),
            message_id,
        })
    }

    async fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
    ) -> Result<MessageHandle, TransportError> {
        if let Some(delay) = self.edit_delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .failing_edits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(TransportError::Delivery("edit rejected".to_string()));
        }
        let mut texts = self.texts.lock().unwrap();
        if texts.get(&handle.message_id).map(String::as_str) == Some(text) {
            return Err(TransportError::EditConflict);
        }
        texts.insert(handle.message_id, text.to_string());
        self.edits.lock().unwrap().push(RecordedEdit {
            message_id: handle.message_id,
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(handle.clone())
    }

    async fn report_error(&self, conversation_id: &ConversationId, detail: &str) {
        self.errors
            .lock()
            .unwrap()
            .push((conversation_id.clone(), detail.to_string()));
    }
}

/// Backend that replays fragments at fixed offsets from the start of the stream.
pub struct ScriptedBackend {
    kind: BackendKind,
    script: Vec<(Duration, Fragment)>,
    hang_after_script: bool,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedBackend {
    pub fn new(kind: BackendKind, script: Vec<(Duration, Fragment)>) -> Self {
        Self {
            kind,
            script,
            hang_after_script: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Text fragments at the given offsets in milliseconds, then end of stream.
    pub fn timed_text(kind: BackendKind, steps: &[(u64, &str)], end_at_ms: u64) -> Self {
        let mut script: Vec<(Duration, Fragment)> = steps
            .iter()
            .map(|(ms, text)| (Duration::from_millis(*ms), Fragment::Text(text.to_string())))
            .collect();
        script.push((Duration::from_millis(end_at_ms), Fragment::End));
        Self::new(kind, script)
    }

    /// Never finishes once the script is exhausted.
    pub fn hanging(mut self) -> Self {
        self.hang_after_script = true;
        self
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn stream(&self, request: StreamRequest, sink: FragmentSink) {
        self.requests.lock().unwrap().push(request);
        let start = Instant::now();

        for (offset, fragment) in &self.script {
            tokio::time::sleep_until(start + *offset).await;
            match fragment {
                Fragment::Text(text) => {
                    if !sink.text(text.clone()).await {
                        return;
                    }
                }
                Fragment::End => return sink.end().await,
                Fragment::Error(error) => return sink.error(error.clone()).await,
            }
        }

        if self.hang_after_script {
            std::future::pending::<()>().await;
        }
    }
}

/// A scripted backend behind the trait object the pipeline takes.
pub fn scripted(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, Arc<dyn StreamBackend>) {
    let backend = Arc::new(backend);
    let shared: Arc<dyn StreamBackend> = backend.clone();
    (backend, shared)
}
