use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::http::{post_json, stream_lines, LineDecoder, LineEvent};
use super::lines::{data_payload, DONE_SENTINEL};
use super::{BackendKind, FragmentSink, StreamBackend, StreamRequest};
use crate::api::CumulativeChunk;
use crate::core::error::MalformedRecord;

/// Streaming servers that resend the whole text generated so far on every
/// line. Only the newly appended part is passed on.
pub struct CumulativeBackend {
    client: reqwest::Client,
    url: String,
}

impl CumulativeBackend {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            url: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl StreamBackend for CumulativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Cumulative
    }

    async fn stream(&self, request: StreamRequest, sink: FragmentSink) {
        let prompt = request.input.into_text();
        let body = request
            .params
            .request_body([("prompt", json!(prompt)), ("stream", json!(true))]);

        match post_json(&self.client, &self.url, &body, None).await {
            Ok(response) => stream_lines(response, CumulativeDecoder::default(), sink).await,
            Err(error) => sink.error(error).await,
        }
    }
}

/// Tracks how many bytes of the cumulative text have already been emitted.
#[derive(Default)]
struct CumulativeDecoder {
    emitted: usize,
}

impl CumulativeDecoder {
    fn delta(&mut self, text: &str) -> Option<String> {
        if text.len() < self.emitted {
            debug!(seen = self.emitted, len = text.len(), "cumulative text shrank");
            return None;
        }
        if !text.is_char_boundary(self.emitted) {
            debug!(seen = self.emitted, "cumulative text diverged mid-character");
            return None;
        }
        let delta = &text[self.emitted..];
        self.emitted = text.len();
        (!delta.is_empty()).then(|| delta.to_string())
    }
}

impl LineDecoder for CumulativeDecoder {
    fn decode(&mut self, line: &str) -> Result<LineEvent, MalformedRecord> {
        let Some(payload) = data_payload(line) else {
            return Ok(LineEvent::Skip);
        };
        if payload == DONE_SENTINEL {
            return Ok(LineEvent::Done);
        }

        let chunk: CumulativeChunk =
            serde_json::from_str(payload).map_err(|err| MalformedRecord::new(err.to_string()))?;
        Ok(chunk
            .text
            .into_text()
            .and_then(|text| self.delta(&text))
            .map_or(LineEvent::Skip, LineEvent::Text))
    }
}
