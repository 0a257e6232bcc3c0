//! Activation kernels (spec §4.B.4).

const GELU_COEFF: f32 = 0.044715;
const SQRT_2_OVER_PI: f32 = 0.797_884_56;

/// Tanh approximation of GELU: max absolute error <= 5e-4 vs. the exact
/// erf-based definition.
pub fn gelu(input: &[f32], out: &mut [f32], n: usize) {
    assert_eq!(input.len(), n);
    assert_eq!(out.len(), n);
    for i in 0..n {
        let x = input[i];
        let inner = SQRT_2_OVER_PI * (x + GELU_COEFF * x * x * x);
        out[i] = 0.5 * x * (1.0 + inner.tanh());
    }
}

/// In-place variant of [`gelu`]: each element depends only on itself, so
/// this avoids the separate output buffer the hot-path workspace would
/// otherwise need to allocate.
pub fn gelu_inplace(buf: &mut [f32], n: usize) {
    assert_eq!(buf.len(), n);
    for x in buf.iter_mut() {
        let v = *x;
        let inner = SQRT_2_OVER_PI * (v + GELU_COEFF * v * v * v);
        *x = 0.5 * v * (1.0 + inner.tanh());
    }
}

/// Element-wise `out = a + b`.
pub fn add(a: &[f32], b: &[f32], out: &mut [f32], n: usize) {
    assert_eq!(a.len(), n);
    assert_eq!(b.len(), n);
    assert_eq!(out.len(), n);
    for i in 0..n {
        out[i] = a[i] + b[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gelu_matches_reference_within_tolerance() {
        let xs = [-3.0f32, -1.0, 0.0, 1.0, 3.0];
        let mut out = [0.0f32; 5];
        gelu(&xs, &mut out, 5);
        for (x, y) in xs.iter().zip(out.iter()) {
            let reference = 0.5 * x * (1.0 + erf_approx(*x / std::f32::consts::SQRT_2));
            assert!((reference - y).abs() <= 5e-3);
        }
    }

    #[test]
    fn gelu_is_zero_at_zero() {
        let mut out = [1.0f32];
        gelu(&[0.0], &mut out, 1);
        assert!(out[0].abs() < 1e-6);
    }

    #[test]
    fn gelu_inplace_matches_the_two_buffer_variant() {
        let xs = [-2.0f32, 0.5, 2.0];
        let mut a = xs;
        let mut out = [0.0f32; 3];
        gelu(&xs, &mut out, 3);
        gelu_inplace(&mut a, 3);
        assert_eq!(a, out);
    }

    #[test]
    fn add_is_elementwise() {
        let mut out = [0.0f32; 3];
        add(&[1.0, 2.0, 3.0], &[10.0, 20.0, 30.0], &mut out, 3);
        assert_eq!(out, [11.0, 22.0, 33.0]);
    }

    // Abramowitz-Stegun approximation, test-only reference for gelu's tolerance check.
    fn erf_approx(x: f32) -> f32 {
        let sign = if x < 0.0 { -1.0 } else { 1.0 };
        let x = x.abs();
        let a1 = 0.254829592;
        let a2 = -0.284496736;
        let a3 = 1.421413741;
        let a4 = -1.453152027;
        let a5 = 1.061405429;
        let p = 0.3275911;
        let t = 1.0 / (1.0 + p * x);
        let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
        sign * y
    }
}
