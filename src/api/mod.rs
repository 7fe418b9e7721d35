//! Wire payloads for the supported backend protocols.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque generation parameters (temperature, token limits, sampler settings)
/// passed through to the backend unmodified.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerationParams(Map<String, Value>);

impl GenerationParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// The parameters as a JSON object with the protocol's own keys layered
    /// on top, so a stray `prompt` or `stream` entry can never override them.
    pub fn request_body<I>(&self, protocol_fields: I) -> Value
    where
        I: IntoIterator<Item = (&'static str, Value)>,
    {
        let mut body = self.0.clone();
        for (key, value) in protocol_fields {
            body.insert(key.to_string(), value);
        }
        Value::Object(body)
    }
}

// OpenAI-compatible chat completions (SSE).

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Deserialize)]
pub struct ChatResponseDelta {
    pub content: Option<String>,
}

#[derive(Deserialize)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub delta: Option<ChatResponseDelta>,
}

#[derive(Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatResponseChoice>,
}

// WebSocket event streaming.

/// One frame received from an event-streaming server.
#[derive(Debug, Deserialize)]
pub struct StreamEvent {
    pub event: String,
    #[serde(default)]
    pub text: Option<String>,
}

pub const EVENT_TEXT_STREAM: &str = "text_stream";
pub const EVENT_STREAM_END: &str = "stream_end";

// Buffered generate endpoint.

#[derive(Debug, Deserialize)]
pub struct GenerateResult {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub results: Vec<GenerateResult>,
}

// Cumulative line-delimited streaming.

/// Servers disagree on whether the running text is a string or a one-element list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CumulativeText {
    Single(String),
    Batch(Vec<String>),
}

impl CumulativeText {
    pub fn into_text(self) -> Option<String> {
        match self {
            CumulativeText::Single(text) => Some(text),
            CumulativeText::Batch(texts) => texts.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CumulativeChunk {
    pub text: CumulativeText,
}
