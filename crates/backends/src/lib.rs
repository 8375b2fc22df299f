//! Generation backends for Colloquy.
//!
//! Each backend implements [`TokenSource`] from colloquy-core:
//! - [`HttpCompletionSource`] — llama-server style `/completion` endpoint
//! - [`TensorParallelSource`] — OpenAI-compatible `/v1/completions` cluster
//! - `LocalSource` — in-process GGUF inference (cargo feature `local`)
//!
//! The remote backends speak text over the wire: the token context is
//! decoded to prompt text before transmission and streamed fragments are
//! re-encoded into tokens on receipt, with marker tags surviving arbitrary
//! fragment boundaries.

pub mod http;
mod sse;
pub mod tensor;

#[cfg(feature = "local")]
pub mod local;

pub use http::HttpCompletionSource;
pub use tensor::TensorParallelSource;

#[cfg(feature = "local")]
pub use local::LocalSource;

use colloquy_config::AppConfig;
use colloquy_core::{Error, SourceError, TokenSource};

/// Build the token source selected by configuration. Fails fast on missing
/// checkpoints so a misconfigured backend surfaces before the first turn.
pub fn build_source(config: &AppConfig) -> Result<Box<dyn TokenSource>, Error> {
    match config.backend.as_str() {
        "http" => Ok(Box::new(HttpCompletionSource::new(
            &config.server_url,
            config.temperature,
            config.max_tokens,
        ))),
        "tensor" => {
            let checkpoint = config.checkpoint.as_deref().ok_or_else(|| {
                SourceError::CheckpointNotFound(
                    "the tensor backend requires --checkpoint".into(),
                )
            })?;
            Ok(Box::new(TensorParallelSource::new(
                &config.server_url,
                checkpoint,
                config.temperature,
                config.max_tokens,
            )))
        }
        #[cfg(feature = "local")]
        "local" => {
            let checkpoint = config.checkpoint.as_deref().ok_or_else(|| {
                SourceError::CheckpointNotFound(
                    "the local backend requires --checkpoint".into(),
                )
            })?;
            let source =
                local::LocalSource::load(checkpoint, config.temperature, config.max_tokens)?;
            Ok(Box::new(source))
        }
        #[cfg(not(feature = "local"))]
        "local" => Err(Error::Source(SourceError::ModelLoadFailed(
            "this build does not include local inference (enable the `local` feature)".into(),
        ))),
        other => Err(Error::Internal(format!("unknown backend '{other}'"))),
    }
}
