use serde::{Deserialize, Serialize};

use super::{check_dimensions, classify_http_error, http_agent, with_retries, Embedder};
use crate::cancel::CancelToken;
use crate::config::{LmStudioConfig, OpenAiConfig, OpenRouterConfig};
use crate::error::{EmbedderErrorKind, GrepaiError, Result};

/// Provider request-size limit; larger batches are split transparently.
const MAX_INPUTS_PER_REQUEST: usize = 64;

/// Cloud provider speaking the OpenAI embeddings shape. LM Studio and
/// OpenRouter share the wire format and differ only in endpoint and auth.
#[derive(Debug)]
pub struct OpenAiEmbedder {
    agent: ureq::Agent,
    url: String,
    api_key: Option<String>,
    model: String,
    dimensions: usize,
    provider: &'static str,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Deserialize)]
struct EmbedItem {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn openai(cfg: &OpenAiConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(GrepaiError::embedder(
                EmbedderErrorKind::Auth,
                "openai api_key is not set; configure embedder.openai.api_key",
            ));
        }
        Ok(Self::build(
            "openai",
            &cfg.url,
            Some(cfg.api_key.clone()),
            &cfg.model,
            cfg.dimensions,
        ))
    }

    pub fn lmstudio(cfg: &LmStudioConfig) -> Self {
        Self::build("lmstudio", &cfg.url, None, &cfg.model, cfg.dimensions)
    }

    pub fn openrouter(cfg: &OpenRouterConfig) -> Result<Self> {
        if cfg.api_key.is_empty() {
            return Err(GrepaiError::embedder(
                EmbedderErrorKind::Auth,
                "openrouter api_key is not set; configure embedder.openrouter.api_key",
            ));
        }
        Ok(Self::build(
            "openrouter",
            &cfg.url,
            Some(cfg.api_key.clone()),
            &cfg.model,
            cfg.dimensions,
        ))
    }

    fn build(
        provider: &'static str,
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        dimensions: usize,
    ) -> Self {
        Self {
            agent: http_agent(super::EMBED_TIMEOUT_SECS),
            url: format!("{}/v1/embeddings", base_url.trim_end_matches('/')),
            api_key,
            model: model.to_string(),
            dimensions,
            provider,
        }
    }

    fn embed_slice(&self, token: &CancelToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response: EmbedResponse = with_retries(token, || {
            let mut request = self.agent.post(&self.url);
            if let Some(key) = &self.api_key {
                request = request.set("Authorization", &format!("Bearer {}", key));
            }
            request
                .send_json(&EmbedRequest {
                    model: &self.model,
                    input: texts,
                })
                .map_err(|e| classify_http_error(self.provider, e))?
                .into_json()
                .map_err(|e| {
                    GrepaiError::embedder(
                        EmbedderErrorKind::Protocol,
                        format!("{} response parse error: {}", self.provider, e),
                    )
                })
        })?;

        if response.data.len() != texts.len() {
            return Err(GrepaiError::embedder(
                EmbedderErrorKind::Protocol,
                format!(
                    "{} returned {} embeddings for {} inputs",
                    self.provider,
                    response.data.len(),
                    texts.len()
                ),
            ));
        }

        let mut items = response.data;
        items.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            check_dimensions(&item.embedding, self.dimensions, self.provider)?;
            vectors.push(item.embedding);
        }
        Ok(vectors)
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed_batch(&self, token: &CancelToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for slice in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            token.checkpoint()?;
            vectors.extend(self.embed_slice(token, slice)?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
