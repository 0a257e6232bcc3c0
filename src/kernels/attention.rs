//! Attention primitives (spec §4.B.2): causal softmax, scaled QK, and
//! the attention-output GEMM. Shapes are passed explicitly; outputs are
//! written into caller-provided buffers.

/// In-place softmax over `scores[0..valid_len]`. Positions at or beyond
/// `valid_len` are left at zero, never `-inf`, because callers use the
/// full row as multiplicative weights. Max-subtract before exp for
/// numerical stability.
pub fn softmax_causal_row(scores: &mut [f32], valid_len: usize) {
    if valid_len == 0 {
        scores.fill(0.0);
        return;
    }
    let row = &mut scores[..valid_len];

    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in row.iter_mut() {
        let e = (*v - max).exp();
        *v = e;
        sum += e;
    }
    let inv_sum = 1.0 / sum;
    for v in row.iter_mut() {
        *v *= inv_sum;
    }
    for v in scores[valid_len..].iter_mut() {
        *v = 0.0;
    }
}

/// `out[h,i,j] = scale * dot(Q[h,i,:], K[h,j,:])` for causal `j <= i`
/// (or all `j < k_len` when `causal` is false, i.e. the decode step
/// where the new query is always last). `q_len`/`k_len` let the decode
/// path pass `q_len=1` against the full cached `k_len`.
///
/// `k` is addressed with per-head stride `k_stride` rather than `k_len`,
/// so this can read directly out of a KV cache's fixed-capacity buffer
/// (`k_stride == max_context_tokens`) without a copy.
#[allow(clippy::too_many_arguments)]
pub fn scaled_qk(
    q: &[f32],
    k: &[f32],
    out: &mut [f32],
    heads: usize,
    q_len: usize,
    k_len: usize,
    k_stride: usize,
    head_dim: usize,
    causal: bool,
    q_offset: usize,
) {
    let scale = 1.0 / (head_dim as f32).sqrt();
    out.fill(0.0);

    for h in 0..heads {
        let q_base = h * q_len * head_dim;
        let k_base = h * k_stride * head_dim;
        let out_base = h * q_len * k_len;

        for i in 0..q_len {
            let q_row = &q[q_base + i * head_dim..q_base + (i + 1) * head_dim];
            let limit = if causal { (q_offset + i + 1).min(k_len) } else { k_len };
            for j in 0..limit {
                let k_row = &k[k_base + j * head_dim..k_base + (j + 1) * head_dim];
                let mut dot = 0.0f32;
                for d in 0..head_dim {
                    dot += q_row[d] * k_row[d];
                }
                out[out_base + i * k_len + j] = dot * scale;
            }
        }
    }
}

/// `out[h,i,d] = sum_j P[h,i,j] * V[h,j,d]`. `v` is addressed with
/// per-head stride `v_stride` for the same KV-cache-direct-read reason
/// as [`scaled_qk`].
pub fn attention_output(
    p: &[f32],
    v: &[f32],
    out: &mut [f32],
    heads: usize,
    q_len: usize,
    k_len: usize,
    v_stride: usize,
    head_dim: usize,
) {
    out.fill(0.0);
    for h in 0..heads {
        let p_base = h * q_len * k_len;
        let v_base = h * v_stride * head_dim;
        let out_base = h * q_len * head_dim;

        for i in 0..q_len {
            let p_row = &p[p_base + i * k_len..p_base + (i + 1) * k_len];
            let out_row = &mut out[out_base + i * head_dim..out_base + (i + 1) * head_dim];
            for j in 0..k_len {
                let weight = p_row[j];
                if weight == 0.0 {
                    continue;
                }
                let v_row = &v[v_base + j * head_dim..v_base + (j + 1) * head_dim];
                for d in 0..head_dim {
                    out_row[d] += weight * v_row[d];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_row_sums_to_one() {
        let mut row = vec![1.0, 2.0, 3.0, 0.0, 0.0];
        softmax_causal_row(&mut row, 3);
        let sum: f32 = row[..3].iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert_eq!(&row[3..], &[0.0, 0.0]);
    }

    #[test]
    fn softmax_is_invariant_to_constant_shift() {
        let mut a = vec![1.0, 2.0, 3.0];
        let mut b = vec![101.0, 102.0, 103.0];
        softmax_causal_row(&mut a, 3);
        softmax_causal_row(&mut b, 3);
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn scaled_qk_masks_future_positions() {
        // heads=1, q_len=2, k_len=2, head_dim=1, causal
        let q = [1.0f32, 1.0];
        let k = [1.0f32, 1.0];
        let mut out = vec![0.0f32; 4];
        scaled_qk(&q, &k, &mut out, 1, 2, 2, 2, 1, true, 0);
        // out[0,0]=scale, out[0,1]=0 (masked), out[1,0]=scale, out[1,1]=scale
        assert_eq!(out[1], 0.0);
        assert!(out[0] > 0.0);
        assert!(out[3] > 0.0);
    }

    #[test]
    fn attention_output_weights_values_correctly() {
        let p = [1.0f32, 0.0]; // heads=1,q_len=1,k_len=2
        let v = [5.0f32, 9.0]; // head_dim=1
        let mut out = vec![0.0f32; 1];
        attention_output(&p, &v, &mut out, 1, 1, 2, 2, 1);
        assert_eq!(out[0], 5.0);
    }
}
