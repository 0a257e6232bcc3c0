//! Tensor workspace (component C, spec §4.C): a keyed container of
//! pre-allocated fp32 buffers, sized once from the model configuration at
//! session construction. Guarantees zero-alloc decode — no buffer grows
//! after `Workspace::new`.

use crate::config::ModelConfig;
use crate::error::ConfigError;
use std::collections::HashMap;

/// One named scratch buffer, capacity fixed at construction.
struct Buffer {
    data: Vec<f32>,
}

/// Pre-allocated scratch space for a single forward pass. Owned by one
/// session; never shared, never re-entered concurrently (spec §4.C).
pub struct Workspace {
    buffers: HashMap<&'static str, Buffer>,
}

impl Workspace {
    /// Allocate every required buffer at its maximum size for `config`.
    /// This is the only allocation point in the session's lifetime.
    pub fn new(config: &ModelConfig) -> Self {
        let d = config.embed_dim;
        let t_max = config.max_context_tokens;
        let h = config.num_heads;
        let dh = config.head_dim();
        let f = config.ffn_dim;
        let v = config.vocab_size;

        let sizes: &[(&'static str, usize)] = &[
            ("embedding_out", t_max * d),
            ("ln_out_1", t_max * d),
            ("ln_out_2", t_max * d),
            ("qkv_proj", t_max * 3 * d),
            ("q", h * t_max * dh),
            ("k", h * t_max * dh),
            ("v", h * t_max * dh),
            ("attn_scores", h * t_max * t_max),
            ("attn_out", t_max * d),
            ("mlp_hidden", t_max * f),
            ("block_residual", t_max * d),
            ("logits", v),
        ];

        let mut buffers = HashMap::with_capacity(sizes.len());
        for &(key, cap) in sizes {
            buffers.insert(key, Buffer { data: vec![0.0; cap] });
        }
        Self { buffers }
    }

    /// Borrow the first `len` elements of the named buffer, mutably.
    /// Fatal configuration error if `len` exceeds the pre-sized capacity.
    pub fn get_mut(&mut self, key: &'static str, len: usize) -> Result<&mut [f32], ConfigError> {
        let buf = self
            .buffers
            .get_mut(key)
            .unwrap_or_else(|| panic!("unknown workspace key '{key}'"));
        if len > buf.data.len() {
            return Err(ConfigError::WorkspaceTooSmall {
                key,
                needed: len,
                have: buf.data.len(),
            });
        }
        Ok(&mut buf.data[..len])
    }

    pub fn capacity_of(&self, key: &'static str) -> usize {
        self.buffers
            .get(key)
            .unwrap_or_else(|| panic!("unknown workspace key '{key}'"))
            .data
            .len()
    }
}
