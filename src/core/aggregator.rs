//! Collects a fragment stream into one string.

use futures::{pin_mut, Stream, StreamExt};
use tracing::debug;

use crate::domain::DigestError;

/// Concatenate fragments in arrival order
///
/// Fails with `EmptyGeneration` when nothing but whitespace arrived, and
/// with `Generation` when the stream yields an error. Fragments received
/// before an error are discarded.
pub async fn aggregate<S>(stage: &str, stream: S) -> Result<String, DigestError>
where
    S: Stream<Item = anyhow::Result<String>>,
{
    pin_mut!(stream);

    let mut text = String::new();
    let mut fragments = 0usize;

    while let Some(fragment) = stream.next().await {
        match fragment {
            Ok(fragment) => {
                fragments += 1;
                text.push_str(&fragment);
            }
            Err(e) => {
                return Err(DigestError::Generation {
                    stage: stage.to_string(),
                    message: format!("stream failed after {} fragments: {:#}", fragments, e),
                });
            }
        }
    }

    debug!(stage, fragments, bytes = text.len(), "Stream complete");

    if text.trim().is_empty() {
        return Err(DigestError::EmptyGeneration {
            stage: stage.to_string(),
            reason: format!("{} fragments, no text", fragments),
        });
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use futures::stream;

    fn ok_stream(parts: &[&str]) -> impl Stream<Item = anyhow::Result<String>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(p.to_string()))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn test_concatenates_without_separator() {
        let text = aggregate("s", ok_stream(&["a", "b", "c"])).await.unwrap();
        assert_eq!(text, "abc");
    }

    #[tokio::test]
    async fn test_keeps_whitespace_between_fragments() {
        let text = aggregate("s", ok_stream(&["line one\n", "\n", "line two "])).await.unwrap();
        assert_eq!(text, "line one\n\nline two ");
    }

    #[tokio::test]
    async fn test_empty_stream_is_empty_generation() {
        let err = aggregate("s", ok_stream(&[])).await.unwrap_err();
        assert!(matches!(err, DigestError::EmptyGeneration { .. }));

        let err = aggregate("s", ok_stream(&[""])).await.unwrap_err();
        assert!(matches!(err, DigestError::EmptyGeneration { .. }));

        let err = aggregate("s", ok_stream(&["  ", "\n"])).await.unwrap_err();
        assert!(matches!(err, DigestError::EmptyGeneration { .. }));
    }

    #[tokio::test]
    async fn test_stream_error_fails_generation() {
        let stream = stream::iter(vec![Ok("partial".to_string()), Err(anyhow!("reset"))]);
        match aggregate("highlight", stream).await {
            Err(DigestError::Generation { stage, message }) => {
                assert_eq!(stage, "highlight");
                assert!(message.contains("reset"));
            }
            other => panic!("expected generation error, got {:?}", other),
        }
    }
}
