use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{check_dimensions, classify_http_error, http_agent, with_retries, Embedder};
use crate::cancel::CancelToken;
use crate::config::OllamaConfig;
use crate::error::Result;

/// Local Ollama-style provider: one request per text, dimensions discovered
/// from the first response when not configured.
pub struct OllamaEmbedder {
    agent: ureq::Agent,
    url: String,
    model: String,
    configured: Option<usize>,
    discovered: OnceCell<usize>,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbedder {
    pub fn new(cfg: &OllamaConfig) -> Self {
        Self {
            agent: http_agent(super::EMBED_TIMEOUT_SECS),
            url: format!("{}/api/embeddings", cfg.url.trim_end_matches('/')),
            model: cfg.model.clone(),
            configured: cfg.dimensions,
            discovered: OnceCell::new(),
        }
    }

    fn embed_one(&self, token: &CancelToken, text: &str) -> Result<Vec<f32>> {
        let response: EmbedResponse = with_retries(token, || {
            self.agent
                .post(&self.url)
                .send_json(&EmbedRequest {
                    model: &self.model,
                    prompt: text,
                })
                .map_err(|e| classify_http_error("ollama", e))?
                .into_json()
                .map_err(|e| {
                    crate::error::GrepaiError::embedder(
                        crate::error::EmbedderErrorKind::Protocol,
                        format!("ollama response parse error: {}", e),
                    )
                })
        })?;

        let vector = response.embedding;
        if let Some(expected) = self.configured {
            check_dimensions(&vector, expected, "ollama")?;
        }
        let _ = self.discovered.set(vector.len());
        Ok(vector)
    }
}

impl Embedder for OllamaEmbedder {
    fn embed_batch(&self, token: &CancelToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            token.checkpoint()?;
            vectors.push(self.embed_one(token, text)?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.configured
            .or_else(|| self.discovered.get().copied())
            .unwrap_or(OllamaConfig::DEFAULT_DIMENSIONS)
    }
}
