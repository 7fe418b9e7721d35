use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{extract_error_summary, post_json, stream_lines, LineDecoder, LineEvent};
use super::lines::{data_payload, DONE_SENTINEL};
use super::{BackendKind, FragmentSink, StreamBackend, StreamRequest};
use crate::api::ChatResponse;
use crate::core::error::{BackendError, MalformedRecord};
use crate::utils::url::chat_completions_url;

/// OpenAI-compatible chat completions streamed as server-sent events.
pub struct OpenAiBackend {
    client: reqwest::Client,
    url: String,
    model: Option<String>,
    api_key: Option<String>,
}

impl OpenAiBackend {
    pub fn new(
        client: reqwest::Client,
        endpoint: &str,
        model: Option<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            url: chat_completions_url(endpoint),
            model,
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(&self, request: StreamRequest) -> Value {
        let messages = request.input.into_messages();
        let mut fields = vec![("messages", json!(messages)), ("stream", json!(true))];
        if let Some(model) = &self.model {
            fields.push(("model", json!(model)));
        }
        request.params.request_body(fields)
    }
}

#[async_trait]
impl StreamBackend for OpenAiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    async fn stream(&self, request: StreamRequest, sink: FragmentSink) {
        let body = self.request_body(request);
        match post_json(&self.client, &self.url, &body, self.api_key.as_deref()).await {
            Ok(response) => stream_lines(response, ChatDecoder, sink).await,
            Err(error) => sink.error(error).await,
        }
    }
}

struct ChatDecoder;

impl LineDecoder for ChatDecoder {
    fn decode(&mut self, line: &str) -> Result<LineEvent, MalformedRecord> {
        match data_payload(line) {
            Some(payload) => decode_chat_payload(payload),
            None => Ok(LineEvent::Skip),
        }
    }
}

fn decode_chat_payload(payload: &str) -> Result<LineEvent, MalformedRecord> {
    if payload == DONE_SENTINEL {
        return Ok(LineEvent::Done);
    }
    if payload.is_empty() {
        return Ok(LineEvent::Skip);
    }

    let value: Value =
        serde_json::from_str(payload).map_err(|err| MalformedRecord::new(err.to_string()))?;
    if value.get("error").is_some() {
        let summary = extract_error_summary(&value).unwrap_or_else(|| value.to_string());
        return Ok(LineEvent::Fail(BackendError::Api(summary)));
    }

    let response: ChatResponse =
        serde_json::from_value(value).map_err(|err| MalformedRecord::new(err.to_string()))?;
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content);

    Ok(match content {
        Some(text) => LineEvent::Text(text),
        None => LineEvent::Skip,
    })
}
