use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{BackendKind, FragmentSink, StreamBackend, StreamRequest};
use crate::api::{StreamEvent, EVENT_STREAM_END, EVENT_TEXT_STREAM};
use crate::core::error::{BackendError, MalformedRecord};

/// Local inference servers that stream generation events over a WebSocket.
pub struct WebSocketBackend {
    url: String,
}

enum FrameEvent {
    Text(String),
    End,
    Ignored,
}

fn decode_frame(text: &str) -> Result<FrameEvent, MalformedRecord> {
    let event: StreamEvent =
        serde_json::from_str(text).map_err(|err| MalformedRecord::new(err.to_string()))?;
    Ok(match event.event.as_str() {
        EVENT_TEXT_STREAM => FrameEvent::Text(event.text.unwrap_or_default()),
        EVENT_STREAM_END => FrameEvent::End,
        other => {
            debug!(event = other, "ignoring unknown stream event");
            FrameEvent::Ignored
        }
    })
}

impl WebSocketBackend {
    pub fn new(endpoint: &str) -> Self {
        Self {
            url: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl StreamBackend for WebSocketBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::WebSocket
    }

    async fn stream(&self, request: StreamRequest, sink: FragmentSink) {
        let (mut socket, _) = match connect_async(self.url.as_str()).await {
            Ok(connection) => connection,
            Err(err) => return sink.error(BackendError::Connect(err.to_string())).await,
        };

        let prompt = request.input.into_text();
        let frame = request.params.request_body([("prompt", json!(prompt))]);
        if let Err(err) = socket.send(Message::Text(frame.to_string())).await {
            return sink.error(BackendError::Transport(err.to_string())).await;
        }

        loop {
            let text = match socket.next().await {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(_))) | None => {
                    return sink.error(BackendError::ConnectionClosed).await;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => return sink.error(BackendError::Transport(err.to_string())).await,
            };

            match decode_frame(&text) {
                Ok(FrameEvent::Text(chunk)) => {
                    if !sink.text(chunk).await {
                        return;
                    }
                }
                Ok(FrameEvent::End) => {
                    if let Err(err) = socket.close(None).await {
                        debug!("error closing websocket after stream end: {err}");
                    }
                    return sink.end().await;
                }
                Ok(FrameEvent::Ignored) => {}
                Err(malformed) => warn!(frame = %text, "{malformed}"),
            }
        }
    }
}
