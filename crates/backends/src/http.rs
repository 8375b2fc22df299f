//! llama-server HTTP backend.
//!
//! Speaks the `/completion` streaming protocol: POST the prompt text, read
//! SSE-style `data: {json}` lines carrying `content` fragments until a line
//! with `stop: true`. The token context is decoded to text on the way out
//! and fragments are re-encoded on the way in; marker tags split across
//! fragments still re-encode to their reserved ids because the re-encoder
//! carries a partial-tag tail between chunks.
//!
//! Transport failures never surface to the caller: they are logged and the
//! token stream simply ends early, which the session treats as end of turn.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use colloquy_core::encoding::{decode, StreamEncoder, Token, TokenSet, ENCODING_NAME};
use colloquy_core::TokenSource;

use crate::sse::LineBuffer;

/// Token source backed by a llama-server `/completion` endpoint.
pub struct HttpCompletionSource {
    url: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl HttpCompletionSource {
    pub fn new(url: &str, temperature: f32, max_tokens: usize) -> Self {
        Self {
            url: url.to_string(),
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

/// One `data: {...}` line from the completion stream.
#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
}

#[async_trait]
impl TokenSource for HttpCompletionSource {
    fn name(&self) -> &str {
        "llama-server"
    }

    fn encoding_name(&self) -> &str {
        ENCODING_NAME
    }

    async fn generate(&self, context: Vec<Token>, stop: TokenSet) -> mpsc::Receiver<Token> {
        let (tx, rx) = mpsc::channel(64);
        let prompt = decode(&context);
        let url = self.url.clone();
        let client = self.client.clone();

        // Stop detection is structural: the model's terminator tags arrive
        // as text and are caught after re-encoding, so the wire stop list
        // stays empty.
        let body = serde_json::json!({
            "prompt": prompt,
            "n_predict": self.max_tokens,
            "temperature": self.temperature,
            "stream": true,
            "stop": [],
            "cache_prompt": true,
        });

        debug!(url = %url, context_tokens = context.len(), "Sending completion request");

        tokio::spawn(async move {
            let response = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %url, error = %e, "Completion request failed");
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let error_body = response.text().await.unwrap_or_default();
                warn!(status, body = %error_body, "Completion endpoint returned error");
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut encoder = StreamEncoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "Completion stream interrupted");
                        return;
                    }
                };

                lines.extend(&bytes);

                while let Some(line) = lines.next_line() {
                    // Blank lines are keep-alives
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };

                    let chunk: CompletionChunk = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable stream line");
                            continue;
                        }
                    };

                    for token in encoder.push(&chunk.content) {
                        if stop.contains(token) {
                            return;
                        }
                        if tx.send(token).await.is_err() {
                            return; // receiver dropped
                        }
                    }

                    if chunk.stop {
                        for token in encoder.finish() {
                            if stop.contains(token) {
                                return;
                            }
                            if tx.send(token).await.is_err() {
                                return;
                            }
                        }
                        return;
                    }
                }
            }

            // Server closed the stream without stop: true; flush and end.
            for token in encoder.finish() {
                if stop.contains(token) {
                    return;
                }
                if tx.send(token).await.is_err() {
                    return;
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_content_chunk() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"content":"Hello","stop":false}"#).unwrap();
        assert_eq!(chunk.content, "Hello");
        assert!(!chunk.stop);
    }

    #[test]
    fn parse_stop_chunk() {
        let chunk: CompletionChunk =
            serde_json::from_str(r#"{"content":"","stop":true,"tokens_predicted":12}"#).unwrap();
        assert!(chunk.content.is_empty());
        assert!(chunk.stop);
    }

    #[test]
    fn missing_fields_default() {
        let chunk: CompletionChunk = serde_json::from_str(r#"{}"#).unwrap();
        assert!(chunk.content.is_empty());
        assert!(!chunk.stop);
    }

    #[test]
    fn source_reports_shared_encoding() {
        let source = HttpCompletionSource::new("http://127.0.0.1:8080/completion", 0.7, 4096);
        assert_eq!(source.encoding_name(), ENCODING_NAME);
        assert_eq!(source.name(), "llama-server");
    }

    use crate::sse::serve_once;

    #[tokio::test]
    async fn multibyte_char_split_across_network_chunks_survives() {
        let payload = "data: {\"content\":\"snow \u{2603}\"}\n".as_bytes().to_vec();
        // Cut inside the three-byte snowman (0xE2 0x98 0x83).
        let cut = payload.iter().position(|&b| b == 0xE2).unwrap() + 1;
        let addr = serve_once(vec![
            payload[..cut].to_vec(),
            payload[cut..].to_vec(),
            b"data: {\"content\":\"\",\"stop\":true}\n".to_vec(),
        ])
        .await;

        let source = HttpCompletionSource::new(&format!("http://{addr}/completion"), 0.7, 128);
        let mut rx = source.generate(Vec::new(), TokenSet::default()).await;
        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            tokens.push(token);
        }

        let text = decode(&tokens);
        assert_eq!(text, "snow \u{2603}");
        assert!(!text.contains('\u{FFFD}'));
    }
}
