//! Client for an OpenAI-compatible chat-completions endpoint.
//!
//! Two call shapes: `complete` collects the full response text, and
//! `complete_stream` yields tokens over a channel as SSE chunks arrive.
//! Temperature stays at 0 so SQL generation is as repeatable as the upstream
//! model allows.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::error::EngineError;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful data assistant";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_TOKENS: u32 = 500;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Clone)]
pub struct LlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| EngineError::Config {
                message: format!("Failed to build LLM HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body<'a>(
        &'a self,
        prompt: &'a str,
        system_prompt: &'a str,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: 0.0,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream,
        }
    }

    /// Single-shot completion returning the trimmed response text.
    pub async fn complete(
        &self,
        prompt: &str,
        system_prompt: &str,
    ) -> Result<String, EngineError> {
        let body = self.request_body(prompt, system_prompt, false);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Llm {
                message: format!("LLM call failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Llm {
                message: format!("LLM call failed: {} {}", status, detail),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| EngineError::Llm {
            message: format!("LLM returned unexpected shape: {}", e),
        })?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| EngineError::Llm {
                message: "LLM returned no content".to_string(),
            })?;

        debug!(chars = content.len(), "LLM completion received");
        Ok(content.trim().to_string())
    }

    /// Streaming completion: tokens arrive on the returned stream as they are
    /// emitted upstream. A severed receiver stops the producer task.
    pub async fn complete_stream(
        &self,
        prompt: &str,
        system_prompt: &str,
    ) -> Result<ReceiverStream<Result<String, EngineError>>, EngineError> {
        let body = self.request_body(prompt, system_prompt, true);
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Llm {
                message: format!("LLM stream failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(EngineError::Llm {
                message: format!("LLM stream failed: {} {}", status, detail),
            });
        }

        let (tx, rx) = mpsc::channel::<Result<String, EngineError>>(64);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk: Bytes = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(Err(EngineError::Llm {
                                message: format!("LLM stream failed: {}", e),
                            }))
                            .await;
                        return;
                    }
                };
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited "data: {json}" lines.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(payload) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let payload = payload.trim();
                    if payload.is_empty() || payload == "[DONE]" {
                        continue;
                    }

                    match serde_json::from_str::<StreamChunk>(payload) {
                        Ok(parsed) => {
                            let token = parsed
                                .choices
                                .first()
                                .and_then(|c| c.delta.content.clone());
                            if let Some(token) = token {
                                if tx.send(Ok(token)).await.is_err() {
                                    // Consumer went away, stop reading.
                                    return;
                                }
                            }
                        }
                        Err(e) => warn!("Skipping malformed stream chunk: {}", e),
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_serializes_to_openai_shape() {
        let client = LlmClient::new("https://api.openai.com/v1/", "key", "gpt-4o").unwrap();
        assert_eq!(client.base_url, "https://api.openai.com/v1");

        let body = client.request_body("generate sql", DEFAULT_SYSTEM_PROMPT, true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["max_tokens"], 500);
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "generate sql");
    }

    #[test]
    fn stream_chunk_parses_delta_content() {
        let payload = r#"{"choices":[{"delta":{"content":"SELECT"}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(payload).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("SELECT"));

        let done_delta = r#"{"choices":[{"delta":{}}]}"#;
        let chunk: StreamChunk = serde_json::from_str(done_delta).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
    }
}
