mod ollama;
mod openai;
mod synthetic;

pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;
pub use synthetic::SyntheticEmbedder;

use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{EmbedderConfig, EmbedderProvider};
use crate::error::{EmbedderErrorKind, GrepaiError, Result};

pub const EMBED_TIMEOUT_SECS: u64 = 30;
const MAX_IDLE_CONNECTIONS: usize = 8;
const MAX_ATTEMPTS: usize = 3;
const RETRY_BASE_MS: u64 = 200;

/// Text-to-vector provider. Implementations must keep `embed_batch` output
/// aligned with its input order and produce vectors of exactly
/// `dimensions()` length.
pub trait Embedder: Send + Sync {
    fn embed(&self, token: &CancelToken, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(token, &[text.to_string()])?;
        vectors.pop().ok_or_else(|| {
            GrepaiError::embedder(EmbedderErrorKind::Protocol, "provider returned no embedding")
        })
    }

    fn embed_batch(&self, token: &CancelToken, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize;

    fn close(&self) {}
}

pub fn from_config(cfg: &EmbedderConfig) -> Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match cfg.provider {
        EmbedderProvider::Ollama => Box::new(OllamaEmbedder::new(&cfg.ollama)),
        EmbedderProvider::Openai => Box::new(OpenAiEmbedder::openai(&cfg.openai)?),
        EmbedderProvider::Lmstudio => Box::new(OpenAiEmbedder::lmstudio(&cfg.lmstudio)),
        EmbedderProvider::Openrouter => Box::new(OpenAiEmbedder::openrouter(&cfg.openrouter)?),
        EmbedderProvider::Synthetic => Box::new(SyntheticEmbedder::new(cfg.synthetic.dimensions)),
    };
    Ok(embedder)
}

/// `ceil(len / 4)`: the rough token estimate used for usage statistics.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub(crate) fn http_agent(timeout_secs: u64) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(timeout_secs))
        .max_idle_connections(MAX_IDLE_CONNECTIONS)
        .build()
}

/// Map a ureq failure onto the embedder error taxonomy. 429 and 5xx count
/// as transient so the retry loop picks them up.
pub(crate) fn classify_http_error(provider: &str, err: ureq::Error) -> GrepaiError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = if body.is_empty() {
                format!("{} returned status {}", provider, status)
            } else {
                format!("{} returned status {}: {}", provider, status, body)
            };
            let kind = match status {
                401 | 403 => EmbedderErrorKind::Auth,
                429 | 500..=599 => EmbedderErrorKind::Network,
                _ => EmbedderErrorKind::Protocol,
            };
            GrepaiError::embedder(kind, message)
        }
        ureq::Error::Transport(transport) => GrepaiError::embedder(
            EmbedderErrorKind::Network,
            format!("{} request failed: {}", provider, transport),
        ),
    }
}

/// Bounded exponential backoff around a provider call: 3 attempts,
/// 200 ms base, transient errors only.
pub(crate) fn with_retries<T>(
    token: &CancelToken,
    mut op: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempt = 1;
    loop {
        token.checkpoint()?;
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_ATTEMPTS && err.is_transient() => {
                let backoff = Duration::from_millis(RETRY_BASE_MS * (1 << (attempt - 1)));
                tracing::warn!(
                    "attempt" = attempt,
                    "backoff_ms" = backoff.as_millis(),
                    "error" = %err,
                    "msg" = "retrying embedding request"
                );
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

pub(crate) fn check_dimensions(vector: &[f32], expected: usize, provider: &str) -> Result<()> {
    if vector.len() != expected {
        return Err(GrepaiError::embedder(
            EmbedderErrorKind::Dimensions,
            format!(
                "{} returned a {}-dimensional vector, expected {}",
                provider,
                vector.len(),
                expected
            ),
        ));
    }
    Ok(())
}
