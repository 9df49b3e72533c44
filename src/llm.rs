//! Streaming LLM collaborator for llm nodes.
//!
//! The inference endpoint accepts `{"prompt": ...}` and answers with a
//! streamed plain-text body; the client exposes it as a finite async
//! sequence of UTF-8 chunks. A new call creates a new sequence; streams are
//! not restartable.

use std::pin::Pin;
use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::Client;

use crate::error::EngineError;

pub type PromptStream = Pin<Box<dyn Stream<Item = Result<String, EngineError>> + Send>>;

pub const DEFAULT_LLM_ENDPOINT: &str = "http://localhost:8000/api/generate";

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn stream_prompt(&self, prompt: &str) -> Result<PromptStream, EngineError>;
}

#[derive(Debug, Clone)]
pub struct HttpLlmClient {
    client: Client,
    endpoint: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, EngineError> {
        Self::with_timeout(endpoint, Duration::from_secs(120))
    }

    pub fn with_timeout(
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn stream_prompt(&self, prompt: &str) -> Result<PromptStream, EngineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "prompt": prompt }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(EngineError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        let stream = try_stream! {
            let mut body_stream = response.bytes_stream();
            // Bytes pending until they form complete UTF-8 sequences.
            let mut pending: Vec<u8> = Vec::new();

            while let Some(chunk) = body_stream.next().await {
                let chunk = chunk?;
                pending.extend_from_slice(&chunk);

                let drained = match std::str::from_utf8(&pending) {
                    Ok(text) => {
                        let text = text.to_string();
                        pending.clear();
                        text
                    }
                    Err(err) => {
                        let valid = err.valid_up_to();
                        let text = String::from_utf8_lossy(&pending[..valid]).into_owned();
                        pending.drain(..valid);
                        text
                    }
                };
                if !drained.is_empty() {
                    yield drained;
                }
            }

            if !pending.is_empty() {
                Err(EngineError::Stream(
                    "response body ended mid UTF-8 sequence".to_string(),
                ))?;
            }
        };

        Ok(Box::pin(stream))
    }
}
