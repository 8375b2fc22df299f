//! TokenSource trait — the abstraction over generation backends.
//!
//! A TokenSource takes a fully rendered token context and streams back
//! generated tokens until the model stops or emits a stop token. The session
//! loop calls `generate()` without knowing which backend is behind it.
//!
//! Implementations: llama-server HTTP, tensor-parallel HTTP, local GGUF.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::encoding::{Token, TokenSet};

/// The core token-generation trait.
///
/// `generate` is infallible by signature: transport failures are the
/// implementation's to log, and surface to the caller only as an early end
/// of the stream. The session treats a closed channel as end of turn either
/// way, so a mid-stream network error degrades to a truncated turn instead
/// of aborting the session.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// A human-readable backend name (e.g. "llama-server", "local-gguf").
    fn name(&self) -> &str;

    /// The token encoding this source produces. The session checks this
    /// against its own encoding at construction and refuses mismatches.
    fn encoding_name(&self) -> &str;

    /// Stream a completion for the given context. Generation halts when the
    /// model emits a token in `stop`; the stop token itself is not sent on
    /// the returned channel.
    async fn generate(&self, context: Vec<Token>, stop: TokenSet) -> mpsc::Receiver<Token>;
}
