//! OpenAI-compatible chat completions client with SSE streaming.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FragmentStream, GenerationService};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming chat completions client
pub struct ChatCompletionsClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: Option<f32>,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed server-sent-events line
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    /// Text fragment (may be empty for role/keep-alive chunks)
    Fragment(String),
    Done,
    /// Comments, blank lines, non-data fields
    Ignored,
}

impl ChatCompletionsClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl GenerationService for ChatCompletionsClient {
    fn name(&self) -> &str {
        "chat-completions"
    }

    async fn invoke(&self, user_text: &str, system_instruction: &str) -> Result<FragmentStream> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut messages = Vec::with_capacity(2);
        if !system_instruction.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system_instruction,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user_text,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
            stream: true,
            temperature: self.temperature,
        };

        debug!(model = %self.model, input_bytes = user_text.len(), "Chat completions request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await
            .context("Failed to reach chat completions endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Chat completions error ({}): {}", status, error_text));
        }

        let bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            futures::pin_mut!(bytes);
            let mut buffer: Vec<u8> = Vec::new();

            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow!("Stream interrupted: {}", e));
                        break 'read;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);

                    match parse_sse_line(&line) {
                        Ok(SseLine::Fragment(text)) if !text.is_empty() => yield Ok(text),
                        Ok(SseLine::Done) => break 'read,
                        Ok(_) => {}
                        Err(e) => {
                            yield Err(e);
                            break 'read;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn parse_sse_line(line: &str) -> Result<SseLine> {
    let line = line.trim_end_matches(['\r', '\n']);

    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Ignored);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Ignored);
    }

    let chunk: ChunkResponse =
        serde_json::from_str(data).with_context(|| format!("Malformed stream chunk: {}", data))?;

    let text = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect::<String>();

    Ok(SseLine::Fragment(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fragment() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Fragment("Hel".to_string()));
    }

    #[test]
    fn test_parse_role_chunk_is_empty_fragment() {
        let line = "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\r\n";
        assert_eq!(parse_sse_line(line).unwrap(), SseLine::Fragment(String::new()));
    }

    #[test]
    fn test_parse_done_and_ignored() {
        assert_eq!(parse_sse_line("data: [DONE]\n").unwrap(), SseLine::Done);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), SseLine::Ignored);
        assert_eq!(parse_sse_line("").unwrap(), SseLine::Ignored);
        assert_eq!(parse_sse_line("event: ping").unwrap(), SseLine::Ignored);
    }

    #[test]
    fn test_parse_malformed_chunk() {
        assert!(parse_sse_line("data: {not json").is_err());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = ChatCompletionsClient::new("k", "m").with_base_url("http://localhost:8080/v1/");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
