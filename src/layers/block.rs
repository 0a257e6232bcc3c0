//! Transformer block (spec §4.D): `x = x + attn(LN(x))` then
//! `x = x + mlp(LN(x))`, using the fused `layer_norm_residual` variant
//! for the post-attention residual add so it coalesces with the
//! pre-MLP layer norm.

use crate::error::GenError;
use crate::kernels::activation::add;
use crate::kernels::norm::{layer_norm, layer_norm_residual};
use crate::kv_cache::KvCache;
use crate::layers::attention::{self_attention, AttentionWeights};
use crate::layers::mlp::{mlp, MlpWeights};

pub struct BlockWeights<'a> {
    pub ln1_gamma: &'a [f32],
    pub ln1_beta: &'a [f32],
    pub attn: AttentionWeights<'a>,
    pub ln2_gamma: &'a [f32],
    pub ln2_beta: &'a [f32],
    pub mlp: MlpWeights<'a>,
}

pub struct BlockBuffers<'a> {
    pub ln_out_1: &'a mut [f32],
    pub ln_out_2: &'a mut [f32],
    pub qkv_proj: &'a mut [f32],
    pub q: &'a mut [f32],
    pub k: &'a mut [f32],
    pub v: &'a mut [f32],
    pub attn_scores: &'a mut [f32],
    pub attn_out: &'a mut [f32],
    pub mlp_hidden: &'a mut [f32],
}

#[allow(clippy::too_many_arguments)]
pub fn transformer_block(
    x: &mut [f32],
    weights: &BlockWeights,
    buffers: &mut BlockBuffers,
    cache: &mut KvCache,
    layer: usize,
    t: usize,
    heads: usize,
    head_dim: usize,
    embed_dim: usize,
    ffn_dim: usize,
    eps: f32,
) -> Result<(), GenError> {
    layer_norm(x, weights.ln1_gamma, weights.ln1_beta, buffers.ln_out_1, eps, embed_dim);

    self_attention(
        buffers.ln_out_1,
        &weights.attn,
        cache,
        layer,
        t,
        heads,
        head_dim,
        embed_dim,
        buffers.qkv_proj,
        buffers.q,
        buffers.k,
        buffers.v,
        buffers.attn_scores,
        buffers.attn_out,
    )?;

    // attn_out becomes x + attn_out (new residual stream); ln_out_2 is
    // LayerNorm of that, ready for the MLP.
    layer_norm_residual(
        buffers.attn_out,
        x,
        weights.ln2_gamma,
        weights.ln2_beta,
        buffers.ln_out_2,
        eps,
        embed_dim,
    );

    mlp(buffers.ln_out_2, &weights.mlp, buffers.mlp_hidden, buffers.qkv_proj, t, embed_dim, ffn_dim);

    add(buffers.attn_out, &buffers.qkv_proj[..t * embed_dim], x, t * embed_dim);
    Ok(())
}
