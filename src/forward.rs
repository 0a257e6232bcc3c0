//! Transformer forward pass (component F, spec §4.F): prefill and
//! decode entry points, orchestrating the workspace, layers, and KV
//! cache. Budget checkpoints between blocks are the caller's
//! responsibility (see [`crate::session`]) — this module never
//! suspends or fails mid-block.

use crate::error::{ConfigError, GenError};
use crate::kernels::norm::layer_norm;
use crate::kv_cache::KvCache;
use crate::layers::block::{transformer_block, BlockBuffers};
use crate::layers::embedding::embed;
use crate::layers::linear::linear;
use crate::model::Model;
use crate::workspace::Workspace;

/// Borrow a workspace buffer through a raw pointer instead of `&mut
/// Workspace`, so that several disjoint buffers can be borrowed at
/// once without the borrow checker seeing them as competing reborrows
/// of the same `&mut Workspace`. Safe because every call site below
/// requests a distinct key, and distinct keys back distinct, non-
/// overlapping `Vec<f32>` allocations (spec §4.C) — the returned
/// slices never alias one another, and `ws` outlives every slice
/// derived from it.
unsafe fn borrow_buffer<'w>(ws: *mut Workspace, key: &'static str, len: usize) -> Result<&'w mut [f32], ConfigError> {
    let slice = (*ws).get_mut(key, len)?;
    Ok(std::slice::from_raw_parts_mut(slice.as_mut_ptr(), slice.len()))
}

/// Runs every decoder block over `t` new tokens, threading the residual
/// stream through `workspace`'s `block_residual` buffer and appending
/// each layer's new K/V to `cache`. `between_blocks` is invoked after
/// every block and may abort the pass early (budget/cancellation
/// checks live there, never inside a kernel).
fn run_blocks(
    model: &Model,
    workspace: &mut Workspace,
    cache: &mut KvCache,
    t: usize,
    mut between_blocks: impl FnMut(usize) -> Result<(), GenError>,
) -> Result<(), GenError> {
    let cfg = &model.config;
    let d = cfg.embed_dim;
    let h = cfg.num_heads;
    let dh = cfg.head_dim();
    let f = cfg.ffn_dim;
    let max_tokens = cache.max_tokens();
    let ws: *mut Workspace = workspace;

    for layer in 0..cfg.num_layers {
        let weights = model.block_weights(layer).map_err(to_gen_load)?;

        // SAFETY: each key is requested exactly once per iteration; see
        // `borrow_buffer`.
        let x = unsafe { borrow_buffer(ws, "block_residual", t * d) }.map_err(to_gen)?;
        let mut buffers = unsafe {
            BlockBuffers {
                ln_out_1: borrow_buffer(ws, "ln_out_1", t * d).map_err(to_gen)?,
                ln_out_2: borrow_buffer(ws, "ln_out_2", t * d).map_err(to_gen)?,
                qkv_proj: borrow_buffer(ws, "qkv_proj", t * 3 * d).map_err(to_gen)?,
                q: borrow_buffer(ws, "q", h * t * dh).map_err(to_gen)?,
                k: borrow_buffer(ws, "k", h * t * dh).map_err(to_gen)?,
                v: borrow_buffer(ws, "v", h * t * dh).map_err(to_gen)?,
                attn_scores: borrow_buffer(ws, "attn_scores", h * t * max_tokens).map_err(to_gen)?,
                attn_out: borrow_buffer(ws, "attn_out", t * d).map_err(to_gen)?,
                mlp_hidden: borrow_buffer(ws, "mlp_hidden", t * f).map_err(to_gen)?,
            }
        };

        transformer_block(x, &weights, &mut buffers, cache, layer, t, h, dh, d, f, cfg.layer_norm_eps)?;

        between_blocks(layer)?;
    }
    Ok(())
}

fn to_gen(e: ConfigError) -> GenError {
    GenError::Other(e.to_string())
}

fn to_gen_load(e: crate::error::LoadError) -> GenError {
    GenError::Other(e.to_string())
}

/// Embeds `token_ids` into `block_residual` (seeding the residual
/// stream) and runs them through every block.
fn embed_and_run(
    model: &Model,
    workspace: &mut Workspace,
    cache: &mut KvCache,
    token_ids: &[u32],
    between_blocks: impl FnMut(usize) -> Result<(), GenError>,
) -> Result<(), GenError> {
    let cfg = &model.config;
    let t = token_ids.len();
    let d = cfg.embed_dim;
    let ws: *mut Workspace = workspace;

    let table = model.embedding_table().map_err(to_gen_load)?;
    // SAFETY: embedding_out and block_residual are distinct keys; see
    // `borrow_buffer`.
    let (embedding_out, residual) = unsafe {
        (
            borrow_buffer(ws, "embedding_out", t * d).map_err(to_gen)?,
            borrow_buffer(ws, "block_residual", t * d).map_err(to_gen)?,
        )
    };
    embed(token_ids, table, d, embedding_out);
    residual.copy_from_slice(embedding_out);

    run_blocks(model, workspace, cache, t, between_blocks)
}

/// Applies the final layer norm and LM head to the last position of
/// the residual stream, leaving the result in the workspace's `logits`
/// buffer.
fn final_logits(model: &Model, workspace: &mut Workspace, t: usize) -> Result<(), GenError> {
    let cfg = &model.config;
    let d = cfg.embed_dim;
    let v = cfg.vocab_size;
    let ws: *mut Workspace = workspace;

    let (gamma, beta) = model.final_ln().map_err(to_gen_load)?;
    let lm_head = model.lm_head().map_err(to_gen_load)?;

    // SAFETY: block_residual and ln_out_1 are distinct keys; see
    // `borrow_buffer`. ln_out_1 is sized for t_max * d, well over the
    // single-row `d` this call needs.
    let (residual, normed) = unsafe {
        (
            borrow_buffer(ws, "block_residual", t * d).map_err(to_gen)?,
            borrow_buffer(ws, "ln_out_1", d).map_err(to_gen)?,
        )
    };
    let last_row = &residual[(t - 1) * d..t * d];
    layer_norm(last_row, gamma, beta, normed, cfg.layer_norm_eps, d);

    let logits = workspace.get_mut("logits", v).map_err(to_gen)?;
    linear(normed, &lm_head, logits, 1, d, v);
    Ok(())
}

/// Prefill: the first forward pass of a request, consuming the full
/// prompt. Leaves logits for the last prompt position in the
/// workspace's `logits` buffer.
pub fn prefill(
    model: &Model,
    workspace: &mut Workspace,
    cache: &mut KvCache,
    token_ids: &[u32],
    between_blocks: impl FnMut(usize) -> Result<(), GenError>,
) -> Result<(), GenError> {
    embed_and_run(model, workspace, cache, token_ids, between_blocks)?;
    final_logits(model, workspace, token_ids.len())
}

/// Decode: a single subsequent token, attending against the full
/// cached length built up so far. Leaves logits in the workspace's
/// `logits` buffer.
pub fn decode_step(
    model: &Model,
    workspace: &mut Workspace,
    cache: &mut KvCache,
    token_id: u32,
    between_blocks: impl FnMut(usize) -> Result<(), GenError>,
) -> Result<(), GenError> {
    embed_and_run(model, workspace, cache, &[token_id], between_blocks)?;
    final_logits(model, workspace, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::quant::QuantScheme;
    use crate::store::{TensorEntry, TensorStore};
    use std::collections::HashMap;

    fn tiny_config() -> ModelConfig {
        ModelConfig {
            vocab_size: 6,
            embed_dim: 4,
            num_layers: 2,
            num_heads: 2,
            max_context_tokens: 8,
            ffn_dim: 8,
            layer_norm_eps: 1e-5,
        }
    }

    #[test]
    fn borrow_buffer_yields_disjoint_slices_for_distinct_keys() {
        let cfg = tiny_config();
        let mut ws = Workspace::new(&cfg);
        let ws_ptr: *mut Workspace = &mut ws;
        unsafe {
            let a = borrow_buffer(ws_ptr, "ln_out_1", 4).unwrap();
            let b = borrow_buffer(ws_ptr, "ln_out_2", 4).unwrap();
            a[0] = 1.0;
            b[0] = 2.0;
            assert_eq!(a[0], 1.0);
            assert_eq!(b[0], 2.0);
        }
    }

    /// Appends one row-major f32 tensor to `data` and registers its
    /// entry, returning nothing (entries/data are mutated in place).
    fn push_tensor(data: &mut Vec<u8>, entries: &mut HashMap<String, TensorEntry>, name: &str, rows: usize, cols: usize, values: &[f32]) {
        assert_eq!(values.len(), rows * cols);
        let offset = data.len();
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        entries.insert(
            name.to_string(),
            TensorEntry {
                scheme: QuantScheme::F32,
                shape: [rows, cols, 0, 0, 0, 0, 0, 0],
                rank: 2,
                block_size: 0,
                data_offset: offset,
                data_len: data.len() - offset,
                aux_offset: 0,
                aux_len: 0,
            },
        );
    }

    fn build_one_layer_model() -> Model {
        let cfg = ModelConfig {
            vocab_size: 6,
            embed_dim: 4,
            num_layers: 1,
            num_heads: 2,
            max_context_tokens: 8,
            ffn_dim: 8,
            layer_norm_eps: 1e-5,
        };
        let d = cfg.embed_dim;
        let f = cfg.ffn_dim;
        let v = cfg.vocab_size;

        let mut data = Vec::new();
        let mut entries = HashMap::new();

        let embed: Vec<f32> = (0..v * d).map(|i| (i as f32) * 0.01).collect();
        push_tensor(&mut data, &mut entries, "token_embedding", v, d, &embed);

        let ones = vec![1.0f32; d];
        let zeros_d = vec![0.0f32; d];
        push_tensor(&mut data, &mut entries, "layers.0.ln1.weight", 1, d, &ones);
        push_tensor(&mut data, &mut entries, "layers.0.ln1.bias", 1, d, &zeros_d);

        // Identity-ish fused QKV: pass x straight through into Q, zero K/V.
        let mut wqkv = vec![0.0f32; d * 3 * d];
        for i in 0..d {
            wqkv[i * 3 * d + i] = 1.0;
        }
        push_tensor(&mut data, &mut entries, "layers.0.attn.wqkv", d, 3 * d, &wqkv);

        let mut wo = vec![0.0f32; d * d];
        for i in 0..d {
            wo[i * d + i] = 1.0;
        }
        push_tensor(&mut data, &mut entries, "layers.0.attn.wo", d, d, &wo);

        push_tensor(&mut data, &mut entries, "layers.0.ln2.weight", 1, d, &ones);
        push_tensor(&mut data, &mut entries, "layers.0.ln2.bias", 1, d, &zeros_d);

        let w1 = vec![0.0f32; d * f];
        push_tensor(&mut data, &mut entries, "layers.0.mlp.w1", d, f, &w1);
        let w2 = vec![0.0f32; f * d];
        push_tensor(&mut data, &mut entries, "layers.0.mlp.w2", f, d, &w2);

        push_tensor(&mut data, &mut entries, "final_ln.weight", 1, d, &ones);
        push_tensor(&mut data, &mut entries, "final_ln.bias", 1, d, &zeros_d);

        let lm_head = vec![0.0f32; d * v];
        push_tensor(&mut data, &mut entries, "lm_head", d, v, &lm_head);

        let store = TensorStore::from_owned(data, 0, entries);
        Model::new(cfg, store)
    }

    #[test]
    fn prefill_then_decode_step_produce_vocab_sized_logits() {
        let model = build_one_layer_model();
        let mut workspace = Workspace::new(&model.config);
        let mut cache = KvCache::new(
            model.config.num_layers,
            model.config.num_heads,
            model.config.max_context_tokens,
            model.config.head_dim(),
        );

        prefill(&model, &mut workspace, &mut cache, &[0, 1, 2], |_| Ok(())).unwrap();
        let logits = workspace.get_mut("logits", model.config.vocab_size).unwrap();
        assert_eq!(logits.len(), model.config.vocab_size);

        decode_step(&model, &mut workspace, &mut cache, 3, |_| Ok(())).unwrap();
        assert_eq!(cache.current_length(0), 4);
    }

    #[test]
    fn decode_step_past_capacity_reports_context_full() {
        let model = build_one_layer_model();
        let mut workspace = Workspace::new(&model.config);
        let mut cache = KvCache::new(
            model.config.num_layers,
            model.config.num_heads,
            model.config.max_context_tokens,
            model.config.head_dim(),
        );

        let prompt: Vec<u32> = (0..model.config.max_context_tokens as u32).collect();
        prefill(&model, &mut workspace, &mut cache, &prompt, |_| Ok(())).unwrap();
        let err = decode_step(&model, &mut workspace, &mut cache, 0, |_| Ok(())).unwrap_err();
        assert!(matches!(err, GenError::ContextFull { .. }));
    }
}
