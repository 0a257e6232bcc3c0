//! CPU-only, dependency-free inference engine for quantized decoder-only
//! transformer language models (spec §1). Modules follow the
//! leaves-first dependency order of spec §2's component table: tensor
//! store and kernels at the bottom, the inference session and CLI shell
//! on top.

pub mod cli;
pub mod config;
pub mod error;
pub mod forward;
pub mod kernels;
pub mod kv_cache;
pub mod layers;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod quant;
pub mod sampler;
pub mod session;
pub mod store;
pub mod workspace;

pub use config::{GenerationOptions, ModelConfig, SamplingMode};
pub use error::{ConfigError, GenError, LoadError};
pub use model::Model;
pub use session::{CancellationToken, FinishReason, GenerationResult, InferenceSession, SessionState};
