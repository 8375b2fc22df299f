//! Local inference backend — runs a GGUF-quantized model in-process.
//!
//! Uses [Candle](https://github.com/huggingface/candle) for CPU inference.
//! The checkpoint is a `.gguf` file with a `tokenizer.json` beside it.
//! The model's own tokenizer is
//! bridged to the driver vocabulary by the usual decode→text→re-encode
//! round-trip: the context tokens become prompt text for the model, and
//! every sampled piece re-encodes through the shared vocabulary before the
//! stop set is checked.
//!
//! Sampling is CPU-bound and runs under `spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use tokenizers::Tokenizer;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use colloquy_core::encoding::{decode, StreamEncoder, Token, TokenSet, ENCODING_NAME};
use colloquy_core::{SourceError, TokenSource};

/// Token source running a GGUF model in-process.
///
/// The model sits behind a Mutex because Candle inference is inherently
/// single-threaded; the session never overlaps turns anyway.
pub struct LocalSource {
    state: Arc<Mutex<ModelState>>,
    temperature: f32,
    max_tokens: usize,
}

struct ModelState {
    model: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
}

impl LocalSource {
    /// Load the checkpoint eagerly so a bad path fails at startup, not on
    /// the first turn.
    pub fn load(checkpoint: &str, temperature: f32, max_tokens: usize) -> Result<Self, SourceError> {
        let path = Path::new(checkpoint);
        if !path.exists() {
            return Err(SourceError::CheckpointNotFound(checkpoint.to_string()));
        }

        info!(path = %path.display(), "Loading local GGUF model");

        let mut file = std::fs::File::open(path)
            .map_err(|e| SourceError::ModelLoadFailed(format!("failed to open GGUF file: {e}")))?;

        let gguf = gguf_file::Content::read(&mut file)
            .map_err(|e| SourceError::ModelLoadFailed(format!("failed to parse GGUF file: {e}")))?;

        let device = Device::Cpu;
        let model = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
            .map_err(|e| SourceError::ModelLoadFailed(format!("failed to load weights: {e}")))?;

        let tokenizer_path = path.with_file_name("tokenizer.json");
        if !tokenizer_path.exists() {
            return Err(SourceError::ModelLoadFailed(format!(
                "no tokenizer.json next to {}",
                path.display()
            )));
        }
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| SourceError::ModelLoadFailed(format!("failed to load tokenizer: {e}")))?;

        let eos_token_id = tokenizer
            .token_to_id("</s>")
            .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
            .or_else(|| tokenizer.token_to_id("<|im_end|>"))
            .unwrap_or(2);

        info!(eos_token_id, "Local model loaded");

        Ok(Self {
            state: Arc::new(Mutex::new(ModelState {
                model,
                tokenizer,
                device,
                eos_token_id,
            })),
            temperature,
            max_tokens,
        })
    }
}

#[async_trait]
impl TokenSource for LocalSource {
    fn name(&self) -> &str {
        "local-gguf"
    }

    fn encoding_name(&self) -> &str {
        ENCODING_NAME
    }

    async fn generate(&self, context: Vec<Token>, stop: TokenSet) -> mpsc::Receiver<Token> {
        let (tx, rx) = mpsc::channel(64);
        let prompt = decode(&context);
        let state = Arc::clone(&self.state);
        let temperature = self.temperature;
        let max_tokens = self.max_tokens;

        tokio::task::spawn_blocking(move || {
            let mut guard = state.blocking_lock();
            if let Err(e) = guard.sample(&prompt, temperature, max_tokens, &stop, &tx) {
                warn!(error = %e, "Local generation failed");
            }
        });

        rx
    }
}

impl ModelState {
    /// Tokenize → sample token by token → stream re-encoded pieces until
    /// EOS, a stop token, or the turn budget.
    fn sample(
        &mut self,
        prompt: &str,
        temperature: f32,
        max_tokens: usize,
        stop: &TokenSet,
        tx: &mpsc::Sender<Token>,
    ) -> Result<(), SourceError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| SourceError::ModelLoadFailed(format!("tokenization failed: {e}")))?;
        let prompt_tokens = encoding.get_ids();

        debug!(
            prompt_tokens = prompt_tokens.len(),
            max_tokens, temperature, "Starting local generation"
        );

        let mut input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(map_candle_err)?;

        let mut logits_processor = if temperature <= 0.0 {
            LogitsProcessor::new(42, None, None)
        } else {
            LogitsProcessor::new(42, Some(f64::from(temperature)), None)
        };

        let mut generated: Vec<u32> = Vec::new();
        let mut decoded_len = 0usize;
        let mut encoder = StreamEncoder::new();

        for _ in 0..max_tokens {
            let logits = self
                .model
                .forward(&input, generated.len())
                .map_err(map_candle_err)?;
            let logits = logits.squeeze(0).map_err(map_candle_err)?;
            let last = logits.dim(0).map_err(map_candle_err)? - 1;
            let logits = logits.get(last).map_err(map_candle_err)?;

            let next_token = logits_processor.sample(&logits).map_err(map_candle_err)?;
            if next_token == self.eos_token_id {
                break;
            }
            generated.push(next_token);

            // Decode incrementally: the new piece is whatever text the full
            // decode gained, so multi-token characters surface intact.
            let text = self
                .tokenizer
                .decode(&generated, true)
                .map_err(|e| SourceError::ModelLoadFailed(format!("detokenization failed: {e}")))?;
            let piece = text[decoded_len.min(text.len())..].to_string();
            decoded_len = text.len();

            for token in encoder.push(&piece) {
                if stop.contains(token) {
                    return Ok(());
                }
                if tx.blocking_send(token).is_err() {
                    return Ok(()); // receiver dropped
                }
            }

            input = Tensor::new(&[next_token][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(map_candle_err)?;
        }

        for token in encoder.finish() {
            if stop.contains(token) {
                return Ok(());
            }
            if tx.blocking_send(token).is_err() {
                return Ok(());
            }
        }

        Ok(())
    }
}

fn map_candle_err(e: candle_core::Error) -> SourceError {
    SourceError::ModelLoadFailed(format!("inference error: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_checkpoint_fails_fast() {
        let err = LocalSource::load("/nonexistent/model.gguf", 0.7, 256).unwrap_err();
        assert!(matches!(err, SourceError::CheckpointNotFound(_)));
    }
}
