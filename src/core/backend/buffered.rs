use async_trait::async_trait;
use serde_json::json;

use super::http::post_json;
use super::{BackendKind, FragmentSink, StreamBackend, StreamRequest};
use crate::api::GenerateResponse;
use crate::core::error::BackendError;

/// Generate endpoints that answer with the whole reply in a single response.
pub struct BufferedBackend {
    client: reqwest::Client,
    url: String,
}

impl BufferedBackend {
    pub fn new(client: reqwest::Client, endpoint: &str) -> Self {
        Self {
            client,
            url: endpoint.to_string(),
        }
    }

    async fn generate(&self, request: StreamRequest) -> Result<Vec<String>, BackendError> {
        let prompt = request.input.into_text();
        let body = request.params.request_body([("prompt", json!(prompt))]);

        let response = post_json(&self.client, &self.url, &body, None).await?;
        let payload: GenerateResponse = response
            .json()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))?;

        Ok(payload
            .results
            .into_iter()
            .map(|result| result.text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect())
    }
}

#[async_trait]
impl StreamBackend for BufferedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Buffered
    }

    async fn stream(&self, request: StreamRequest, sink: FragmentSink) {
        match self.generate(request).await {
            Ok(texts) => {
                // Each fragment is the whole reply so far.
                let mut reply = String::new();
                for text in texts {
                    if !reply.is_empty() {
                        reply.push('\n');
                    }
                    reply.push_str(&text);
                    if !sink.text(reply.clone()).await {
                        return;
                    }
                }
                sink.end().await;
            }
            Err(error) => sink.error(error).await,
        }
    }
}
