use super::Embedder;
use crate::cancel::CancelToken;
use crate::error::Result;
use crate::fts::tokenize;

/// Offline provider producing deterministic vectors without a model.
///
/// Tokens are hashed into buckets of a fixed-size term-frequency vector,
/// then L2-normalized, so texts sharing identifiers land near each other
/// under cosine similarity. Useful for tests and air-gapped smoke runs.
pub struct SyntheticEmbedder {
    dimensions: usize,
}

impl SyntheticEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokenize(text) {
            let digest = blake3::hash(token.as_bytes());
            let bytes = digest.as_bytes();
            let bucket = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]) as usize
                % self.dimensions;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for SyntheticEmbedder {
    fn embed_batch(&self, token: &CancelToken, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            token.checkpoint()?;
            vectors.push(self.vectorize(text));
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
