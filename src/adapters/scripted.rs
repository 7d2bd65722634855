//! Deterministic generation service for dry runs and tests.
//!
//! Replies are looked up by system instruction. Instructions without a
//! scripted reply fall back to echoing the user text back in fragments.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;

use super::{FragmentStream, GenerationService};

/// A scripted response to one generation call
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Stream these fragments, then end
    Fragments(Vec<String>),
    /// Stream these fragments, then fail with `message`
    FailAfter { fragments: Vec<String>, message: String },
    /// Fail before any stream is returned
    Refuse(String),
    /// Stream fragments with a delay before each
    Slow { fragments: Vec<String>, delay: Duration },
    /// Never yield anything
    Stall,
}

impl ScriptedReply {
    /// Convenience for a plain text reply split into a few fragments
    pub fn text(text: &str) -> Self {
        ScriptedReply::Fragments(split_fragments(text, 3))
    }
}

/// Recorded generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptedCall {
    pub system_instruction: String,
    pub user_text: String,
}

/// Generation service that replays scripted replies
#[derive(Default)]
pub struct ScriptedGeneration {
    replies: HashMap<String, ScriptedReply>,
    calls: Mutex<Vec<ScriptedCall>>,
}

impl ScriptedGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the reply for calls made with `system_instruction`
    pub fn with_reply(mut self, system_instruction: impl Into<String>, reply: ScriptedReply) -> Self {
        self.replies.insert(system_instruction.into(), reply);
        self
    }

    /// Calls made so far, in order
    pub fn calls(&self) -> Vec<ScriptedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, user_text: &str, system_instruction: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ScriptedCall {
                system_instruction: system_instruction.to_string(),
                user_text: user_text.to_string(),
            });
        }
    }
}

#[async_trait]
impl GenerationService for ScriptedGeneration {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn invoke(&self, user_text: &str, system_instruction: &str) -> Result<FragmentStream> {
        self.record(user_text, system_instruction);

        let reply = self
            .replies
            .get(system_instruction)
            .cloned()
            .unwrap_or_else(|| ScriptedReply::Fragments(split_fragments(user_text, 4)));

        let stream: FragmentStream = match reply {
            ScriptedReply::Fragments(fragments) => {
                Box::pin(stream::iter(fragments.into_iter().map(Ok::<String, anyhow::Error>)))
            }
            ScriptedReply::FailAfter { fragments, message } => Box::pin(
                stream::iter(fragments.into_iter().map(Ok))
                    .chain(stream::once(async move { Err(anyhow!(message)) })),
            ),
            ScriptedReply::Refuse(message) => return Err(anyhow!(message)),
            ScriptedReply::Slow { fragments, delay } => {
                Box::pin(stream::iter(fragments).then(move |fragment| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<String, anyhow::Error>(fragment)
                }))
            }
            ScriptedReply::Stall => Box::pin(stream::pending::<Result<String>>()),
        };

        Ok(stream)
    }
}

/// Split text into roughly `parts` fragments on char boundaries
fn split_fragments(text: &str, parts: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let size = chars.len().div_ceil(parts.max(1));
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(stream: FragmentStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    #[test]
    fn test_split_fragments_rejoins() {
        let parts = split_fragments("今日摘要 hello", 4);
        assert!(parts.len() <= 4);
        assert_eq!(parts.concat(), "今日摘要 hello");
        assert!(split_fragments("", 3).is_empty());
    }

    #[tokio::test]
    async fn test_echo_fallback_and_recording() {
        let service = ScriptedGeneration::new();
        let stream = service.invoke("abcdefgh", "unscripted").await.unwrap();

        let text: String = collect(stream)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(text, "abcdefgh");
        assert_eq!(service.calls().len(), 1);
        assert_eq!(service.calls()[0].system_instruction, "unscripted");
    }

    #[tokio::test]
    async fn test_fail_after_yields_error_last() {
        let service = ScriptedGeneration::new().with_reply(
            "sys",
            ScriptedReply::FailAfter {
                fragments: vec!["a".to_string()],
                message: "connection reset".to_string(),
            },
        );

        let items = collect(service.invoke("x", "sys").await.unwrap()).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn test_refuse() {
        let service = ScriptedGeneration::new().with_reply("sys", ScriptedReply::Refuse("quota".to_string()));
        assert!(service.invoke("x", "sys").await.is_err());
    }
}
