//! Model configuration and per-request generation options (spec §3, §4.H).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Immutable model topology, fixed at load time (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vocabulary size `V`.
    pub vocab_size: usize,
    /// Embedding dimension `D`.
    pub embed_dim: usize,
    /// Number of transformer layers `L`.
    pub num_layers: usize,
    /// Number of attention heads `H`.
    pub num_heads: usize,
    /// Context window `T_max`.
    pub max_context_tokens: usize,
    /// Feed-forward hidden dim `F` (typically `4D`).
    pub ffn_dim: usize,
    /// Layer-norm epsilon.
    pub layer_norm_eps: f32,
}

impl ModelConfig {
    /// Head dimension `D/H`.
    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_heads == 0 || self.embed_dim % self.num_heads != 0 {
            return Err(ConfigError::InvalidModelConfig(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        if self.num_layers == 0 || self.vocab_size == 0 || self.max_context_tokens == 0 {
            return Err(ConfigError::InvalidModelConfig(
                "num_layers, vocab_size and max_context_tokens must all be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sampling strategy selected per request (spec §4.G).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SamplingMode {
    Greedy,
    Temperature { tau: f32 },
    TopK { k: usize, tau: f32 },
}

impl Default for SamplingMode {
    fn default() -> Self {
        SamplingMode::Greedy
    }
}

/// Per-request options (spec §4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_new_tokens: u32,
    pub max_input_tokens: u32,
    pub max_context_tokens: u32,
    pub max_wall_ms: u32,
    pub seed: u64,
    pub sampling: SamplingMode,
    pub stop_tokens: HashSet<u32>,
    pub truncate_input_on_overflow: bool,
}

impl GenerationOptions {
    /// Defaults per spec §4.H, with `max_input_tokens`/`max_context_tokens`
    /// resolved against the model's `T_max` once a model is known.
    pub fn defaults_for(model: &ModelConfig) -> Self {
        Self {
            max_new_tokens: 256,
            max_input_tokens: model.max_context_tokens as u32,
            max_context_tokens: model.max_context_tokens as u32,
            max_wall_ms: u32::MAX,
            seed: 0,
            sampling: SamplingMode::Greedy,
            stop_tokens: HashSet::new(),
            truncate_input_on_overflow: false,
        }
    }
}
