//! Feed-forward block (spec §4.D): two Linears with GELU between,
//! hidden dim `4D` unless overridden by config.

use crate::kernels::activation::gelu_inplace;
use crate::kernels::matmul::FusedWeight;
use crate::layers::linear::linear;

pub struct MlpWeights<'a> {
    pub w1: FusedWeight<'a>,
    pub w2: FusedWeight<'a>,
}

pub fn mlp(x: &[f32], weights: &MlpWeights, hidden_buf: &mut [f32], out: &mut [f32], t: usize, d: usize, f: usize) {
    linear(x, &weights.w1, &mut hidden_buf[..t * f], t, d, f);
    gelu_inplace(&mut hidden_buf[..t * f], t * f);
    linear(&hidden_buf[..t * f], &weights.w2, out, t, f, d);
}
