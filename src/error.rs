//! Error taxonomy for the engine (spec §7).
//!
//! Kernels are total and never fail; every fallible operation lives at
//! load time, session construction time, or in the generation loop.

use thiserror::Error;

/// Errors raised while parsing and validating an SMQ weight file (§6).
/// Fatal: the loader never produces a partial model.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("bad magic: expected \"SMQv0001\"")]
    BadMagic,

    #[error("unsupported format version {0}")]
    BadVersion(u32),

    #[error("malformed header: {0}")]
    BadSize(String),

    #[error("tensor regions overlap: {0}")]
    Overlap(String),

    #[error("tensor '{name}' declared length {declared} does not match computed length {computed}")]
    TensorSizeMismatch {
        name: String,
        declared: u64,
        computed: u64,
    },

    #[error("tensor '{0}' not found")]
    MissingTensor(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid metadata JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while constructing a session (workspace sizing, scheme
/// support). Fatal: a session that fails construction is never returned.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("workspace buffer '{key}' too small: need {needed} elements, have {have}")]
    WorkspaceTooSmall {
        key: &'static str,
        needed: usize,
        have: usize,
    },

    #[error("unsupported quantization scheme for tensor '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid model configuration: {0}")]
    InvalidModelConfig(String),
}

/// Errors raised during generation (spec §7 propagation policy: these
/// terminate the current request but leave the session reusable, except
/// where noted).
///
/// `Cancelled` and `DeadlineExceeded` round out the taxonomy for parity
/// with [`crate::session::FinishReason`]. `InferenceSession::generate`
/// reports cancellation and deadline expiry as a successful result with
/// that `FinishReason` rather than as an `Err` — a cancelled or
/// timed-out request still returns whatever tokens it produced.
/// `InferenceSession::generate_streaming`'s lazy stream does construct
/// both variants, surfacing them as the final item of the sequence,
/// since a streaming consumer has no `GenerationResult` to attach a
/// finish reason to — the error item is the only way to report it.
#[derive(Error, Debug)]
pub enum GenError {
    #[error("prompt of {got} tokens exceeds the input limit of {limit}")]
    InputTooLong { got: usize, limit: usize },

    #[error("KV cache context is full at {current_length}/{max_context_tokens} tokens")]
    ContextFull {
        current_length: usize,
        max_context_tokens: usize,
    },

    #[error("wall-clock deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u32 },

    #[error("generation cancelled")]
    Cancelled,

    #[error("global KV byte budget exceeded")]
    KvBudgetExceeded,

    #[error("{0}")]
    Other(String),
}

impl GenError {
    /// Short machine-readable code carried on every user-visible error
    /// (spec §7: "a short machine-readable code").
    pub fn code(&self) -> &'static str {
        match self {
            GenError::InputTooLong { .. } => "input_too_long",
            GenError::ContextFull { .. } => "context_full",
            GenError::DeadlineExceeded { .. } => "deadline_exceeded",
            GenError::Cancelled => "cancelled",
            GenError::KvBudgetExceeded => "kv_budget_exceeded",
            GenError::Other(_) => "other",
        }
    }
}

pub type LoadResult<T> = Result<T, LoadError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type GenResult<T> = Result<T, GenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gen_error_codes_are_stable() {
        assert_eq!(GenError::Cancelled.code(), "cancelled");
        assert_eq!(
            GenError::ContextFull {
                current_length: 4,
                max_context_tokens: 4
            }
            .code(),
            "context_full"
        );
    }

    #[test]
    fn load_error_messages_name_the_tensor() {
        let e = LoadError::TensorSizeMismatch {
            name: "layers.0.attn.wq".to_string(),
            declared: 10,
            computed: 12,
        };
        assert!(e.to_string().contains("layers.0.attn.wq"));
    }
}
