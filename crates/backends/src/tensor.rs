//! Tensor-parallel cluster backend.
//!
//! Speaks the OpenAI-compatible `/v1/completions` streaming protocol used by
//! vLLM-style serving clusters: fragments arrive as `choices[0].text` in
//! `data:` lines and the stream ends with a `data: [DONE]` sentinel. Same
//! decode/re-encode discipline as the llama-server backend.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use colloquy_core::encoding::{decode, StreamEncoder, Token, TokenSet, ENCODING_NAME};
use colloquy_core::TokenSource;

use crate::sse::LineBuffer;

/// Token source backed by a tensor-parallel serving cluster.
pub struct TensorParallelSource {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
    client: reqwest::Client,
}

impl TensorParallelSource {
    pub fn new(base_url: &str, model: &str, temperature: f32, max_tokens: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionsResponse {
    #[serde(default)]
    choices: Vec<CompletionsChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionsChoice {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl TokenSource for TensorParallelSource {
    fn name(&self) -> &str {
        "tensor-parallel"
    }

    fn encoding_name(&self) -> &str {
        ENCODING_NAME
    }

    async fn generate(&self, context: Vec<Token>, stop: TokenSet) -> mpsc::Receiver<Token> {
        let (tx, rx) = mpsc::channel(64);
        let url = format!("{}/v1/completions", self.base_url);
        let prompt = decode(&context);
        let client = self.client.clone();

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": true,
            "stop": [],
        });

        debug!(url = %url, model = %self.model, "Sending completions request");

        tokio::spawn(async move {
            let response = match client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(url = %url, error = %e, "Completions request failed");
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let error_body = response.text().await.unwrap_or_default();
                warn!(status, body = %error_body, "Completions endpoint returned error");
                return;
            }

            let mut byte_stream = response.bytes_stream();
            let mut lines = LineBuffer::new();
            let mut encoder = StreamEncoder::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "Completions stream interrupted");
                        return;
                    }
                };

                lines.extend(&bytes);

                while let Some(line) = lines.next_line() {
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
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

                    let parsed: CompletionsResponse = match serde_json::from_str(data) {
                        Ok(p) => p,
                        Err(e) => {
                            trace!(data = %data, error = %e, "Ignoring unparseable stream line");
                            continue;
                        }
                    };

                    let Some(choice) = parsed.choices.first() else {
                        continue;
                    };

                    for token in encoder.push(&choice.text) {
                        if stop.contains(token) {
                            return;
                        }
                        if tx.send(token).await.is_err() {
                            return;
                        }
                    }
                }
            }

            // Server closed the stream without [DONE]; flush and end.
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
