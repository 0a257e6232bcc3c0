//! Linear layer (spec §4.D): dispatches to the fused GEMM kernel
//! matching the weight's quantization scheme.

use crate::kernels::matmul::{matmul_fused, FusedWeight};

/// `out[M,N] = x[M,K] · dequant(weight)[K,N]`.
pub fn linear(x: &[f32], weight: &FusedWeight, out: &mut [f32], m: usize, k: usize, n: usize) {
    matmul_fused(x, weight, out, m, k, n);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::QuantScheme;

    #[test]
    fn linear_with_identity_f32_weight_returns_input() {
        let values = [1.0f32, 0.0, 0.0, 1.0];
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let weight = FusedWeight {
            scheme: QuantScheme::F32,
            k: 2,
            n: 2,
            block_size: 0,
            data: &data,
            scales: &[],
            mins: None,
        };
        let x = [3.0f32, 4.0];
        let mut out = [0.0f32; 2];
        linear(&x, &weight, &mut out, 1, 2, 2);
        assert_eq!(out, [3.0, 4.0]);
    }
}
