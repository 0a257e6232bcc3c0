//! Embedding lookup (spec §4.D): `out[t,d] = W_embed[token_id[t], d]`,
//! implemented as row copies, never a matmul.

/// Copy one embedding row per token into `out` (`token_ids.len() * embed_dim`
/// elements). `table` is the raw f32 embedding weight, row-major `(V, D)`.
pub fn embed(token_ids: &[u32], table: &[f32], embed_dim: usize, out: &mut [f32]) {
    assert_eq!(out.len(), token_ids.len() * embed_dim);
    for (t, &id) in token_ids.iter().enumerate() {
        let row_start = id as usize * embed_dim;
        let src = &table[row_start..row_start + embed_dim];
        let dst = &mut out[t * embed_dim..(t + 1) * embed_dim];
        dst.copy_from_slice(src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_copies_the_matching_row_per_token() {
        // V=3, D=2
        let table = [0.0f32, 0.0, 1.0, 1.0, 2.0, 2.0];
        let ids = [2u32, 0u32];
        let mut out = [0.0f32; 4];
        embed(&ids, &table, 2, &mut out);
        assert_eq!(out, [2.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn embed_of_a_single_decode_token_copies_one_row() {
        let table = [5.0f32, 6.0, 7.0, 8.0];
        let ids = [1u32];
        let mut out = [0.0f32; 2];
        embed(&ids, &table, 2, &mut out);
        assert_eq!(out, [7.0, 8.0]);
    }
}
