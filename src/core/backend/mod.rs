//! Backend stream adapters.
//!
//! Every supported wire protocol is one [`StreamBackend`] implementation that
//! pushes [`Fragment`]s into a [`FragmentSink`]. [`open_stream`] runs a backend
//! in its own task and hands the consumer a pull-based [`FragmentStream`];
//! dropping that stream cancels the task, which drops the HTTP response or
//! socket with it.

mod buffered;
mod cumulative;
mod http;
mod lines;
mod openai;
mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::api::GenerationParams;
use crate::core::config::BackendConfig;
use crate::core::error::BackendError;
use crate::core::templates::{PromptRendering, PromptStyle};

pub use buffered::BufferedBackend;
pub use cumulative::CumulativeBackend;
pub use openai::OpenAiBackend;
pub use websocket::WebSocketBackend;

/// Fragments buffered between a backend task and its consumer before the
/// backend is made to wait.
pub const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Text(String),
    End,
    Error(BackendError),
}

impl Fragment {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Fragment::Text(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(alias = "ooba")]
    WebSocket,
    #[serde(alias = "generate", alias = "kobold")]
    Buffered,
    #[serde(alias = "sglang", alias = "aphrodite")]
    Cumulative,
}

/// How the fragments of a backend relate to the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Each fragment is a delta appended to the reply so far.
    Append,
    /// Each fragment is the complete reply so far.
    Replace,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::OpenAi => "openai",
            BackendKind::WebSocket => "websocket",
            BackendKind::Buffered => "buffered",
            BackendKind::Cumulative => "cumulative",
        }
    }

    pub fn prompt_style(self) -> PromptStyle {
        match self {
            BackendKind::OpenAi => PromptStyle::Messages,
            _ => PromptStyle::Text,
        }
    }

    pub fn update_mode(self) -> UpdateMode {
        match self {
            BackendKind::Buffered => UpdateMode::Replace,
            _ => UpdateMode::Append,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub input: PromptRendering,
    pub params: GenerationParams,
}

/// Producer half of a fragment stream, owned by the backend task.
pub struct FragmentSink {
    tx: mpsc::Sender<Fragment>,
}

impl FragmentSink {
    /// Deliver a text delta. Returns false once the consumer has gone away.
    pub async fn text(&self, text: impl Into<String>) -> bool {
        let text = text.into();
        if text.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.send(Fragment::Text(text)).await.is_ok()
    }

    pub async fn end(self) {
        let _ = self.tx.send(Fragment::End).await;
    }

    pub async fn error(self, error: BackendError) {
        debug!(%error, "backend stream failed");
        let _ = self.tx.send(Fragment::Error(error)).await;
    }
}

#[async_trait]
pub trait StreamBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Produce the reply for `request` into `sink`, finishing with `end` or
    /// `error`. Returning without either is read as a dropped connection.
    async fn stream(&self, request: StreamRequest, sink: FragmentSink);
}

/// Consumer half of a running backend stream.
pub struct FragmentStream {
    rx: mpsc::Receiver<Fragment>,
    finished: bool,
    _cancel_on_drop: DropGuard,
}

impl FragmentStream {
    /// The next fragment, or `None` once a terminal fragment has been returned.
    pub async fn next(&mut self) -> Option<Fragment> {
        if self.finished {
            return None;
        }
        let fragment = self
            .rx
            .recv()
            .await
            .unwrap_or(Fragment::Error(BackendError::ConnectionClosed));
        self.finished = fragment.is_terminal();
        Some(fragment)
    }
}

pub fn open_stream(backend: Arc<dyn StreamBackend>, request: StreamRequest) -> FragmentStream {
    let (tx, rx) = mpsc::channel(FRAGMENT_CHANNEL_CAPACITY);
    let cancel_token = CancellationToken::new();
    let task_token = cancel_token.clone();
    let kind = backend.kind();

    debug!(backend = %kind, "opening stream");
    tokio::spawn(async move {
        tokio::select! {
            _ = backend.stream(request, FragmentSink { tx }) => {}
            _ = task_token.cancelled() => {
                debug!(backend = %kind, "stream cancelled");
            }
        }
    });

    FragmentStream {
        rx,
        finished: false,
        _cancel_on_drop: cancel_token.drop_guard(),
    }
}

pub fn build_backend(config: &BackendConfig, client: reqwest::Client) -> Arc<dyn StreamBackend> {
    match config.kind {
        BackendKind::OpenAi => Arc::new(OpenAiBackend::new(
            client,
            &config.endpoint,
            config.model.clone(),
            config.api_key(),
        )),
        BackendKind::WebSocket => Arc::new(WebSocketBackend::new(&config.endpoint)),
        BackendKind::Buffered => Arc::new(BufferedBackend::new(client, &config.endpoint)),
        BackendKind::Cumulative => Arc::new(CumulativeBackend::new(client, &config.endpoint)),
    }
}
