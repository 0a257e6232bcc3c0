//! KV cache (component E, spec §4.E): per-layer append-only key/value
//! storage bounded by `max_context_tokens`, flat pre-allocated buffers
//! with a cursor. Owned by exactly one session; never shared.

use crate::error::GenError;

struct LayerSlot {
    keys: Vec<f32>,
    values: Vec<f32>,
    current_length: usize,
}

impl LayerSlot {
    fn new(heads: usize, max_tokens: usize, head_dim: usize) -> Self {
        let cap = heads * max_tokens * head_dim;
        Self {
            keys: vec![0.0; cap],
            values: vec![0.0; cap],
            current_length: 0,
        }
    }
}

/// Per-layer key/value storage for one session's KV cache.
pub struct KvCache {
    slots: Vec<LayerSlot>,
    heads: usize,
    max_tokens: usize,
    head_dim: usize,
}

impl KvCache {
    pub fn new(num_layers: usize, heads: usize, max_tokens: usize, head_dim: usize) -> Self {
        let slots = (0..num_layers)
            .map(|_| LayerSlot::new(heads, max_tokens, head_dim))
            .collect();
        Self {
            slots,
            heads,
            max_tokens,
            head_dim,
        }
    }

    pub fn current_length(&self, layer: usize) -> usize {
        self.slots[layer].current_length
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Append `n` new rows of K/V for `layer`. `new_k`/`new_v` are
    /// `(heads, n, head_dim)` row-major. Fails with `ContextFull` rather
    /// than partially writing when the cache would overflow.
    pub fn append(&mut self, layer: usize, new_k: &[f32], new_v: &[f32], n: usize) -> Result<(), GenError> {
        let slot = &mut self.slots[layer];
        if slot.current_length + n > self.max_tokens {
            return Err(GenError::ContextFull {
                current_length: slot.current_length,
                max_context_tokens: self.max_tokens,
            });
        }
        debug_assert_eq!(new_k.len(), self.heads * n * self.head_dim);
        debug_assert_eq!(new_v.len(), self.heads * n * self.head_dim);

        for h in 0..self.heads {
            let dst_k_base = h * self.max_tokens * self.head_dim + slot.current_length * self.head_dim;
            let dst_v_base = dst_k_base;
            let src_base = h * n * self.head_dim;
            slot.keys[dst_k_base..dst_k_base + n * self.head_dim]
                .copy_from_slice(&new_k[src_base..src_base + n * self.head_dim]);
            slot.values[dst_v_base..dst_v_base + n * self.head_dim]
                .copy_from_slice(&new_v[src_base..src_base + n * self.head_dim]);
        }
        slot.current_length += n;
        Ok(())
    }

    /// Borrow keys for `layer` over `[0, current_length)` along the
    /// time dimension, as `(heads, current_length, head_dim)`. Callers
    /// must index with the slot's own `max_tokens` stride since the
    /// backing buffer is not repacked on read.
    pub fn keys(&self, layer: usize) -> &[f32] {
        &self.slots[layer].keys
    }

    pub fn values(&self, layer: usize) -> &[f32] {
        &self.slots[layer].values
    }

    pub fn stride(&self) -> usize {
        self.max_tokens * self.head_dim
    }

    /// Reset all cursors to zero without freeing memory.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.current_length = 0;
        }
    }

    /// Allocated footprint in bytes, for budget enforcement.
    pub fn byte_size(&self) -> usize {
        self.slots
            .iter()
            .map(|s| (s.keys.len() + s.values.len()) * std::mem::size_of::<f32>())
            .sum()
    }
}
