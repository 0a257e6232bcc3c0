//! SIMD kernel library (component B, spec §4.B): fused dequant+GEMM,
//! attention primitives, layer norm, and activations. Every kernel here
//! is total — it cannot fail — and allocates nothing. Errors belong to
//! the layers that call these kernels, never to the kernels themselves.

pub mod activation;
pub mod attention;
pub mod matmul;
pub mod norm;

/// Which of the three dispatch paths a fused kernel should take. Tests
/// drive all three against the same inputs to verify the 1e-4 relative
/// agreement spec §8 requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Scalar,
    Portable,
    Wide,
}

impl Dispatch {
    /// Best path available on this binary/platform at runtime.
    pub fn auto() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return Dispatch::Wide;
            }
        }
        Dispatch::Portable
    }
}
