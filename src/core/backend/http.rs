use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tracing::{debug, warn};

use super::lines::LineBuffer;
use super::FragmentSink;
use crate::core::error::{BackendError, MalformedRecord};
use crate::utils::auth::add_auth_headers;

/// What one line of a streamed body means for the reply.
pub(crate) enum LineEvent {
    Skip,
    Text(String),
    Done,
    Fail(BackendError),
}

pub(crate) trait LineDecoder: Send {
    fn decode(&mut self, line: &str) -> Result<LineEvent, MalformedRecord>;
}

pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    api_key: Option<&str>,
) -> Result<reqwest::Response, BackendError> {
    let request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json");
    let response = add_auth_headers(request, api_key)
        .json(body)
        .send()
        .await
        .map_err(|err| BackendError::Connect(err.to_string()))?;

    if !response.status().is_success() {
        return Err(status_error(response).await);
    }
    Ok(response)
}

async fn status_error(response: reqwest::Response) -> BackendError {
    let code = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    warn!(code, "backend request failed");
    BackendError::Status {
        code,
        body: describe_error_body(&body),
    }
}

/// Drive a line-oriented response body through `decoder` into `sink`.
/// Malformed lines are logged and skipped; the end of the body ends the stream.
pub(crate) async fn stream_lines<D: LineDecoder>(
    response: reqwest::Response,
    mut decoder: D,
    sink: FragmentSink,
) {
    let mut body = response.bytes_stream();
    let mut buffer = LineBuffer::default();
    let mut body_ended = false;

    while !body_ended {
        let lines = match body.next().await {
            Some(Ok(chunk)) => buffer.push(&chunk),
            Some(Err(err)) => return sink.error(BackendError::Transport(err.to_string())).await,
            None => {
                body_ended = true;
                buffer.finish()
            }
        };

        for line in lines {
            match decoder.decode(&line) {
                Ok(LineEvent::Skip) => {}
                Ok(LineEvent::Text(text)) => {
                    if !sink.text(text).await {
                        return;
                    }
                }
                Ok(LineEvent::Done) => return sink.end().await,
                Ok(LineEvent::Fail(error)) => return sink.error(error).await,
                Err(malformed) => warn!(line = %line, "{malformed}"),
            }
        }
    }

    debug!("response body ended without a done sentinel");
    sink.end().await;
}

pub(crate) fn extract_error_summary(value: &Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                Value::String(s) => Some(s.to_string()),
                Value::Object(map) => map
                    .get("message")
                    .and_then(|message| message.as_str().map(str::to_owned)),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

/// A readable rendition of an error response body: JSON is pretty-printed
/// under its summary, markup and plain text are fenced as they are.
pub(crate) fn describe_error_body(body: &str) -> String {
    let trimmed = body.trim();

    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value) {
                Some(summary) if !summary.is_empty() => {
                    format!("{summary}\n```json\n{pretty_json}\n```")
                }
                _ => format!("\n```json\n{pretty_json}\n```"),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("\n```xml\n{trimmed}\n```")
    } else {
        trimmed.to_string()
    }
}
