//! BERT-family sentence encoder (all-MiniLM-L6-v2 and siblings) on candle.
//!
//! Weights come from a sentence-transformers `.safetensors` export. Pooling is
//! a mean over token states followed by L2 normalization, so cosine similarity
//! between two outputs reduces to a dot product.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};

use crate::embed::EmbeddingProvider;

/// Subset of a Hugging Face BERT `config.json` the encoder needs.
#[derive(Debug, Clone, Deserialize)]
struct EncoderConfig {
    hidden_size: usize,
    intermediate_size: usize,
    num_attention_heads: usize,
    num_hidden_layers: usize,
    vocab_size: usize,
    max_position_embeddings: usize,
    #[serde(default = "default_type_vocab_size")]
    type_vocab_size: usize,
    #[serde(default = "default_layer_norm_eps")]
    layer_norm_eps: f64,
}

fn default_type_vocab_size() -> usize {
    2
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

impl Default for EncoderConfig {
    // all-MiniLM-L6-v2
    fn default() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 6,
            vocab_size: 30522,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }
}

impl EncoderConfig {
    /// `<stem>-config.json` next to the weights wins; otherwise MiniLM-L6 shapes.
    fn for_weights(model_path: &Path) -> Result<Self> {
        let path = sibling_config_path(model_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let file = std::fs::File::open(&path)
            .with_context(|| format!("open encoder config {}", path.display()))?;
        serde_json::from_reader(file).context("parse encoder config json")
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

fn sibling_config_path(model_path: &Path) -> PathBuf {
    let stem = model_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    model_path.with_file_name(format!("{stem}-config.json"))
}

struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    fn load(vb: VarBuilder, size: usize, eps: f64) -> Result<Self> {
        Ok(Self {
            weight: vb.get(size, "weight")?,
            bias: vb.get(size, "bias")?,
            eps,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mean = x.mean_keepdim(D::Minus1)?;
        let centered = x.broadcast_sub(&mean)?;
        let var = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let normed = centered.broadcast_div(&(var + self.eps)?.sqrt()?)?;
        Ok(normed
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)?)
    }
}

struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
}

impl SelfAttention {
    fn load(vb: VarBuilder, config: &EncoderConfig) -> Result<Self> {
        let h = config.hidden_size;
        let vb = vb.pp("attention");
        let proj = vb.pp("self");

        Ok(Self {
            query: candle_nn::linear(h, h, proj.pp("query"))?,
            key: candle_nn::linear(h, h, proj.pp("key"))?,
            value: candle_nn::linear(h, h, proj.pp("value"))?,
            output: candle_nn::linear(h, h, vb.pp("output").pp("dense"))?,
            norm: LayerNorm::load(vb.pp("output").pp("LayerNorm"), h, config.layer_norm_eps)?,
            heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        Ok(x.reshape((batch, seq_len, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, hidden) = x.dims3()?;

        let q = self.split_heads(&self.query.forward(x)?)?;
        let k = self.split_heads(&self.key.forward(x)?)?;
        let v = self.split_heads(&self.value.forward(x)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?)?.affine(scale, 0.0)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, hidden))?;

        let residual = (x + self.output.forward(&context)?)?;
        self.norm.forward(&residual)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
    norm: LayerNorm,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &EncoderConfig) -> Result<Self> {
        Ok(Self {
            up: candle_nn::linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            down: candle_nn::linear(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("output").pp("dense"),
            )?,
            norm: LayerNorm::load(
                vb.pp("output").pp("LayerNorm"),
                config.hidden_size,
                config.layer_norm_eps,
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = self.down.forward(&self.up.forward(x)?.gelu_erf()?)?;
        self.norm.forward(&(x + h)?)
    }
}

struct EncoderLayer {
    attention: SelfAttention,
    ffn: FeedForward,
}

impl EncoderLayer {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.ffn.forward(&self.attention.forward(x)?)
    }
}

struct SentenceEncoder {
    word_embeddings: Tensor,
    position_embeddings: Tensor,
    token_type_embeddings: Tensor,
    embedding_norm: LayerNorm,
    layers: Vec<EncoderLayer>,
}

impl SentenceEncoder {
    fn load(path: &Path, config: &EncoderConfig, device: &Device) -> Result<Self> {
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        // Some exports keep the `bert.` prefix from the pretraining head.
        let vb = if vb.contains_tensor("bert.embeddings.word_embeddings.weight") {
            vb.pp("bert")
        } else {
            vb
        };

        let h = config.hidden_size;
        let emb = vb.pp("embeddings");
        let word_embeddings = emb
            .pp("word_embeddings")
            .get((config.vocab_size, h), "weight")?;
        let position_embeddings = emb
            .pp("position_embeddings")
            .get((config.max_position_embeddings, h), "weight")?;
        let token_type_embeddings = emb
            .pp("token_type_embeddings")
            .get((config.type_vocab_size, h), "weight")?;
        let embedding_norm = LayerNorm::load(emb.pp("LayerNorm"), h, config.layer_norm_eps)?;

        let layers = (0..config.num_hidden_layers)
            .map(|i| {
                let vb = vb.pp("encoder").pp("layer").pp(i.to_string());
                Ok(EncoderLayer {
                    attention: SelfAttention::load(vb.clone(), config)?,
                    ffn: FeedForward::load(vb, config)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            word_embeddings,
            position_embeddings,
            token_type_embeddings,
            embedding_norm,
            layers,
        })
    }

    fn encode(&self, token_ids: &[u32]) -> Result<Vec<f32>> {
        let device = self.word_embeddings.device();
        let seq_len = token_ids.len();

        let ids = Tensor::new(token_ids, device)?;
        let positions: Vec<u32> = (0..seq_len as u32).collect();
        let positions = Tensor::new(positions.as_slice(), device)?;
        let token_types = Tensor::zeros(seq_len, DType::U32, device)?;

        let embedded = ((self.word_embeddings.index_select(&ids, 0)?
            + self.position_embeddings.index_select(&positions, 0)?)?
            + self.token_type_embeddings.index_select(&token_types, 0)?)?;

        let mut hidden = self.embedding_norm.forward(&embedded)?.unsqueeze(0)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }

        let pooled = hidden.mean(1)?.squeeze(0)?;
        let norm: f32 = pooled.sqr()?.sum_all()?.sqrt()?.to_scalar()?;
        let pooled = if norm > 0.0 {
            pooled.affine(1.0 / norm as f64, 0.0)?
        } else {
            pooled
        };

        Ok(pooled.to_vec1::<f32>()?)
    }
}

/// Pretrained sentence embeddings on CPU. Tensors and tokenizer are immutable
/// after load, so one instance serves concurrent callers without locking.
pub struct SentenceEmbeddingProvider {
    encoder: SentenceEncoder,
    tokenizer: Tokenizer,
}

impl SentenceEmbeddingProvider {
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let config = EncoderConfig::for_weights(model_path)?;
        let encoder = SentenceEncoder::load(model_path, &config, &Device::Cpu)?;

        let mut tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| anyhow!("load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_position_embeddings,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("configure truncation: {e}"))?;

        Ok(Self { encoder, tokenizer })
    }
}

impl EmbeddingProvider for SentenceEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        self.encoder.encode(encoding.get_ids())
    }
}
