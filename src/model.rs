//! Resolves named tensors out of the [`TensorStore`] into the typed
//! weight views the layer modules expect. Tensor naming convention
//! (fixed by this loader, not by the wire format): `token_embedding`,
//! `layers.{i}.{ln1,attn.wqkv,attn.wo,ln2,mlp.w1,mlp.w2}`, `final_ln`,
//! `lm_head`.

use crate::config::ModelConfig;
use crate::error::LoadError;
use crate::kernels::matmul::FusedWeight;
use crate::layers::attention::AttentionWeights;
use crate::layers::block::BlockWeights;
use crate::layers::mlp::MlpWeights;
use crate::store::TensorStore;
use std::sync::Arc;

/// An immutable, loaded model: topology plus a handle to its weights.
/// Shared by reference across sessions with no synchronization.
pub struct Model {
    pub config: ModelConfig,
    pub store: Arc<TensorStore>,
}

impl Model {
    pub fn new(config: ModelConfig, store: Arc<TensorStore>) -> Self {
        Self { config, store }
    }

    fn f32_vec(&self, name: &str) -> Result<&[f32], LoadError> {
        let bytes = self.store.data_bytes(name)?;
        Ok(bytemuck::cast_slice(bytes))
    }

    fn fused_weight(&self, name: &str) -> Result<FusedWeight<'_>, LoadError> {
        let entry = self.store.entry(name)?;
        let data = self.store.data_bytes(name)?;
        let aux = self.store.scales_f32(name).unwrap_or(&[]);
        Ok(FusedWeight::from_entry(entry, data, aux))
    }

    pub fn embedding_table(&self) -> Result<&[f32], LoadError> {
        self.f32_vec("token_embedding")
    }

    pub fn final_ln(&self) -> Result<(&[f32], &[f32]), LoadError> {
        Ok((self.f32_vec("final_ln.weight")?, self.f32_vec("final_ln.bias")?))
    }

    pub fn lm_head(&self) -> Result<FusedWeight<'_>, LoadError> {
        self.fused_weight("lm_head")
    }

    pub fn block_weights(&self, layer: usize) -> Result<BlockWeights<'_>, LoadError> {
        Ok(BlockWeights {
            ln1_gamma: self.f32_vec(&format!("layers.{layer}.ln1.weight"))?,
            ln1_beta: self.f32_vec(&format!("layers.{layer}.ln1.bias"))?,
            attn: AttentionWeights {
                wqkv: self.fused_weight(&format!("layers.{layer}.attn.wqkv"))?,
                wo: self.fused_weight(&format!("layers.{layer}.attn.wo"))?,
            },
            ln2_gamma: self.f32_vec(&format!("layers.{layer}.ln2.weight"))?,
            ln2_beta: self.f32_vec(&format!("layers.{layer}.ln2.bias"))?,
            mlp: MlpWeights {
                w1: self.fused_weight(&format!("layers.{layer}.mlp.w1"))?,
                w2: self.fused_weight(&format!("layers.{layer}.mlp.w2"))?,
            },
        })
    }
}
