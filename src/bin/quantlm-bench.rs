//! Manual throughput benchmark: loads a real model file and reports
//! prefill and steady-state decode throughput. Complements the
//! `criterion`-driven `benches/` suite with an end-to-end, real-weights
//! run that's convenient to point at an arbitrary SMQ file.

use quantlm::config::{GenerationOptions, SamplingMode};
use quantlm::session::{CancellationToken, InferenceSession};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

fn main() {
    quantlm::logging::init();

    let mut args = std::env::args().skip(1);
    let model_path = match args.next() {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: quantlm-bench <model.smq> [num_new_tokens]");
            std::process::exit(2);
        }
    };
    let num_new_tokens: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(64);

    println!("=== quantlm decode throughput benchmark ===");
    println!("model: {}", model_path.display());

    let load_start = Instant::now();
    let model = match quantlm::loader::load_model(&model_path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("failed to load model: {e}");
            std::process::exit(2);
        }
    };
    println!("loaded in {:.2}s", load_start.elapsed().as_secs_f32());
    println!(
        "config: {} layers, {} heads, {} embed_dim, {} vocab",
        model.config.num_layers, model.config.num_heads, model.config.embed_dim, model.config.vocab_size
    );

    let model = Arc::new(model);
    let mut session = InferenceSession::new(model.clone());
    let mut options = GenerationOptions::defaults_for(&model.config);
    options.max_new_tokens = num_new_tokens;
    options.sampling = SamplingMode::Greedy;

    let prompt_tokens: Vec<u32> = vec![0, 1, 2, 3];
    let cancel = CancellationToken::new();

    let start = Instant::now();
    let result = session.generate(&prompt_tokens, &options, &cancel).expect("generation failed");
    let elapsed = start.elapsed();

    let toks_per_sec = result.usage.generated_tokens as f64 / elapsed.as_secs_f64();
    println!("finish_reason: {:?}", result.finish_reason);
    println!("generated {} tokens in {:.3}s ({:.1} tok/s)", result.usage.generated_tokens, elapsed.as_secs_f64(), toks_per_sec);
    println!("time to first token: {}ms", result.usage.ttft_ms);
}
