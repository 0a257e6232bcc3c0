//! Thin CLI shell (SPEC_FULL.md §15): parse args, load a model, build a
//! session, call `generate`, map errors to exit codes. No inference
//! logic of its own lives here — everything routes through
//! [`crate::session::InferenceSession`].

use crate::config::{GenerationOptions, SamplingMode};
use crate::error::GenError;
use crate::loader::load_model;
use crate::model::Model;
use crate::session::{CancellationToken, FinishReason, InferenceSession};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "quantlm", about = "CPU-only inference over quantized transformer weights", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one generation request against a loaded model.
    Generate(GenerateArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SamplingArg {
    Greedy,
    Temperature,
    TopK,
}

#[derive(Debug, Clone, Parser)]
pub struct GenerateArgs {
    /// Path to an SMQ weight file.
    #[arg(long)]
    pub model: PathBuf,

    /// Comma-separated prompt token ids (the tokenizer is out of scope,
    /// spec §1; callers are expected to feed already-encoded ids).
    #[arg(long, value_delimiter = ',')]
    pub prompt_tokens: Vec<u32>,

    #[arg(long, value_enum, default_value = "greedy")]
    pub sampling: SamplingArg,

    #[arg(long, default_value_t = 1.0)]
    pub temperature: f32,

    #[arg(long, default_value_t = 40)]
    pub top_k: usize,

    #[arg(long, default_value_t = 256)]
    pub max_new_tokens: u32,

    #[arg(long, default_value_t = u32::MAX)]
    pub max_wall_ms: u32,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Truncate the prompt from the head instead of failing when it
    /// exceeds the input/context limit.
    #[arg(long, default_value_t = false)]
    pub truncate_input: bool,
}

/// Map a `GenerateArgs`'s sampling selection onto the core's
/// `SamplingMode`.
fn sampling_mode(args: &GenerateArgs) -> SamplingMode {
    match args.sampling {
        SamplingArg::Greedy => SamplingMode::Greedy,
        SamplingArg::Temperature => SamplingMode::Temperature { tau: args.temperature },
        SamplingArg::TopK => SamplingMode::TopK {
            k: args.top_k,
            tau: args.temperature,
        },
    }
}

/// Run the `generate` subcommand, printing the resulting token ids to
/// stdout (one per line) and returning the process exit code (spec §7:
/// every error carries a short machine-readable code; the CLI maps that
/// code onto a small, documented set of process exit statuses).
pub fn generate_command(args: GenerateArgs) -> i32 {
    let model = match load_model(&args.model) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to load model");
            return 3;
        }
    };
    let model = Arc::new(model);

    let mut options = GenerationOptions::defaults_for(&model.config);
    options.max_new_tokens = args.max_new_tokens;
    options.max_wall_ms = args.max_wall_ms;
    options.seed = args.seed;
    options.sampling = sampling_mode(&args);
    options.truncate_input_on_overflow = args.truncate_input;
    options.stop_tokens = HashSet::new();

    run_generate(model, &args.prompt_tokens, &options)
}

fn run_generate(model: Arc<Model>, prompt_tokens: &[u32], options: &GenerationOptions) -> i32 {
    let mut session = InferenceSession::new(model);
    let cancel = CancellationToken::new();

    match session.generate(prompt_tokens, options, &cancel) {
        Ok(result) => {
            for token in &result.tokens {
                println!("{token}");
            }
            tracing::info!(
                finish_reason = ?result.finish_reason,
                generated = result.usage.generated_tokens,
                wall_ms = result.usage.wall_ms,
                "generation complete"
            );
            match result.finish_reason {
                FinishReason::Error => 7,
                _ => 0,
            }
        }
        Err(e) => {
            tracing::error!(error = %e, code = e.code(), "generation failed");
            generation_error_exit_code(&e)
        }
    }
}

/// Exit code for a generation-time failure (spec §6): `3` is reserved
/// for model-load failures, so generation errors start at `4`.
fn generation_error_exit_code(e: &GenError) -> i32 {
    match e {
        GenError::ContextFull { .. } => 4,
        GenError::DeadlineExceeded { .. } => 5,
        GenError::Cancelled => 6,
        GenError::InputTooLong { .. } | GenError::KvBudgetExceeded | GenError::Other(_) => 7,
    }
}
