use anyhow::Result;
use tracing::info;

use crate::config::{ResolverConfig, DEFAULT_EMBEDDING_DIM};
use crate::error::ResolverError;
use crate::sentence_embed::SentenceEmbeddingProvider;

/// Name that selects [`HashEmbeddingProvider`] instead of a pretrained model.
pub const HASH_MODEL_NAME: &str = "hash";

/// Turns text into a fixed-length dense vector.
///
/// Providers are shared read-only across request threads once loaded, so
/// `embed` must be safe to call concurrently.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

impl EmbeddingProvider for Box<dyn EmbeddingProvider> {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text)
    }
}

/// Bag-of-tokens FNV hashing. No model weights needed; two texts only score
/// above zero when they share a token.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dim: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(8) }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self {
            dim: DEFAULT_EMBEDDING_DIM,
        }
    }
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dim];

        for token in text
            .to_ascii_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut h: u64 = 1469598103934665603;
            for b in token.as_bytes() {
                h ^= *b as u64;
                h = h.wrapping_mul(1099511628211);
            }
            let idx = (h as usize) % self.dim;
            v[idx] += 1.0;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }

        Ok(v)
    }
}

/// Resolve `embedding_model_name` to a loaded provider.
///
/// `"hash"` selects the hashing provider. Any other name is looked up under
/// `model_dir` as `<name>.safetensors` + `<name>-tokenizer.json`. Failure here
/// is fatal: the process must not start serving without its model.
pub fn load_embedder(
    config: &ResolverConfig,
) -> std::result::Result<Box<dyn EmbeddingProvider>, ResolverError> {
    let name = config.embedding_model_name.trim();
    if name == HASH_MODEL_NAME {
        info!(model = name, dim = DEFAULT_EMBEDDING_DIM, "Using hash embeddings");
        return Ok(Box::new(HashEmbeddingProvider::default()));
    }

    let model_path = config.model_dir.join(format!("{name}.safetensors"));
    let tokenizer_path = config.model_dir.join(format!("{name}-tokenizer.json"));
    if !model_path.exists() {
        return Err(ResolverError::ModelLoad(format!(
            "model '{name}' not found at {}",
            model_path.display()
        )));
    }
    if !tokenizer_path.exists() {
        return Err(ResolverError::ModelLoad(format!(
            "tokenizer for '{name}' not found at {}",
            tokenizer_path.display()
        )));
    }

    info!(model = name, path = %model_path.display(), "Loading embedding model");
    let provider = SentenceEmbeddingProvider::load(&model_path, &tokenizer_path)
        .map_err(|e| ResolverError::ModelLoad(format!("{name}: {e:#}")))?;
    info!(model = name, "Embedding model loaded");
    Ok(Box::new(provider))
}
