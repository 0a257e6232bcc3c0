//! Multi-head causal self-attention (spec §4.D): one fused QKV
//! projection, reshape into per-head views, scaled QK against the full
//! cached length, causal softmax, weighted sum over V, output
//! projection. K/V for the new positions are appended to the KV cache
//! before the QK product so the cache already reflects this call.

use crate::error::GenError;
use crate::kernels::attention::{attention_output, scaled_qk, softmax_causal_row};
use crate::kernels::matmul::FusedWeight;
use crate::kv_cache::KvCache;
use crate::layers::linear::linear;

pub struct AttentionWeights<'a> {
    pub wqkv: FusedWeight<'a>,
    pub wo: FusedWeight<'a>,
}

/// Reshape a `(t, h*dh)` token-major slab into a `(h, t, dh)` head-major
/// buffer, reading `3*h*dh`-wide rows and pulling out the `offset`-th
/// `h*dh` segment (0 = Q, 1 = K, 2 = V within the fused QKV output).
fn split_heads(qkv: &[f32], t: usize, h: usize, dh: usize, segment: usize, out: &mut [f32]) {
    let d = h * dh;
    for token in 0..t {
        let row = &qkv[token * 3 * d + segment * d..token * 3 * d + segment * d + d];
        for head in 0..h {
            let src = &row[head * dh..(head + 1) * dh];
            let dst_base = head * t * dh + token * dh;
            out[dst_base..dst_base + dh].copy_from_slice(src);
        }
    }
}

/// Inverse of [`split_heads`]: `(h, t, dh)` head-major back to `(t, h*dh)`
/// token-major.
fn merge_heads(src: &[f32], t: usize, h: usize, dh: usize, out: &mut [f32]) {
    let d = h * dh;
    for head in 0..h {
        for token in 0..t {
            let s = &src[head * t * dh + token * dh..head * t * dh + (token + 1) * dh];
            let dst = &mut out[token * d + head * dh..token * d + (head + 1) * dh];
            dst.copy_from_slice(s);
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn self_attention(
    x_norm: &[f32],
    weights: &AttentionWeights,
    cache: &mut KvCache,
    layer: usize,
    t_new: usize,
    heads: usize,
    head_dim: usize,
    embed_dim: usize,
    qkv_buf: &mut [f32],
    q_buf: &mut [f32],
    k_buf: &mut [f32],
    v_buf: &mut [f32],
    scores_buf: &mut [f32],
    out: &mut [f32],
) -> Result<(), GenError> {
    linear(x_norm, &weights.wqkv, qkv_buf, t_new, embed_dim, 3 * embed_dim);

    split_heads(qkv_buf, t_new, heads, head_dim, 0, q_buf);
    split_heads(qkv_buf, t_new, heads, head_dim, 1, k_buf);
    split_heads(qkv_buf, t_new, heads, head_dim, 2, v_buf);

    let q_offset = cache.current_length(layer);
    cache.append(layer, k_buf, v_buf, t_new)?;
    let k_len = cache.current_length(layer);
    let stride = cache.stride();

    scaled_qk(
        q_buf,
        cache.keys(layer),
        scores_buf,
        heads,
        t_new,
        k_len,
        stride,
        head_dim,
        true,
        q_offset,
    );

    for h in 0..heads {
        for i in 0..t_new {
            let valid_len = (q_offset + i + 1).min(k_len);
            let row = &mut scores_buf[h * t_new * k_len + i * k_len..h * t_new * k_len + (i + 1) * k_len];
            softmax_causal_row(row, valid_len);
        }
    }

    // q_buf's Q role is done once scaled_qk has read it; reuse it to
    // hold the head-major attention output instead of needing a
    // dedicated workspace entry.
    attention_output(scores_buf, cache.values(layer), q_buf, heads, t_new, k_len, stride, head_dim);

    merge_heads(q_buf, t_new, heads, head_dim, qkv_buf);
    linear(&qkv_buf[..t_new * embed_dim], &weights.wo, out, t_new, embed_dim, embed_dim);
    Ok(())
}
