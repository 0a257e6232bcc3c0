//! Inference session (component H, spec §4.H): owns one request's
//! workspace and KV cache, runs the generation loop, and exposes both
//! a blocking and a streaming API. Two sessions never share a
//! workspace or cache — each owns its own by construction, so the
//! forward pass's exclusive `&mut` references are enough to guarantee
//! isolation without extra locking.

use crate::config::{GenerationOptions, ModelConfig};
use crate::error::GenError;
use crate::forward::{decode_step, prefill};
use crate::kv_cache::KvCache;
use crate::metrics::{MetricEvent, MetricsSink};
use crate::model::Model;
use crate::sampler::{sample, Rng};
use crate::workspace::Workspace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared flag used to cancel an in-flight generation from another
/// thread. Cloning shares the same underlying flag; `cancel()` is the
/// only mutator.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why generation stopped (spec §4.H). `Error` covers a decode-loop
/// failure that isn't one of the other gated reasons (e.g. a workspace
/// or `Other` error surfacing mid-generation); `generate` never
/// constructs it since at that point there's no well-formed
/// `GenerationResult` left to attach a reason to and the error is
/// returned directly instead. `generate_streaming` does construct it,
/// to pick the right session state and metric before re-raising the
/// same error as the stream's final item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    MaxTokens,
    Stop,
    Cancelled,
    Deadline,
    ContextFull,
    Error,
}

/// Observable session lifecycle (spec §4.H): single-direction
/// transitions, reported to the metrics sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Token counts and timings for one completed request.
#[derive(Debug, Clone)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub ttft_ms: u64,
    pub wall_ms: u64,
}

/// Result of a blocking [`InferenceSession::generate`] call.
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub tokens: Vec<u32>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

/// One session's forward-pass resources, owned exclusively and never
/// shared with another session.
pub struct InferenceSession {
    model: Arc<Model>,
    workspace: Workspace,
    cache: KvCache,
    session_id: uuid::Uuid,
    metrics: Option<Arc<dyn MetricsSink>>,
    state: SessionState,
}

impl InferenceSession {
    pub fn new(model: Arc<Model>) -> Self {
        let cfg: &ModelConfig = &model.config;
        let workspace = Workspace::new(cfg);
        let cache = KvCache::new(cfg.num_layers, cfg.num_heads, cfg.max_context_tokens, cfg.head_dim());
        Self {
            model,
            workspace,
            cache,
            session_id: uuid::Uuid::new_v4(),
            metrics: None,
            state: SessionState::Idle,
        }
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    pub fn id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Reuse this session for another request: clears the KV cache
    /// cursor and returns state to `Idle`. The workspace buffers are
    /// not freed, only overwritten by the next forward pass.
    pub fn reset(&mut self) {
        self.cache.reset();
        self.state = SessionState::Idle;
    }

    fn emit(&self, event: MetricEvent) {
        if let Some(sink) = &self.metrics {
            sink.on_event(self.session_id, event);
        }
    }

    fn resolved_input_and_context_limits(&self, options: &GenerationOptions) -> (usize, usize) {
        let t_max = self.model.config.max_context_tokens;
        (
            (options.max_input_tokens as usize).min(t_max),
            (options.max_context_tokens as usize).min(t_max),
        )
    }

    /// Validate and, if requested, truncate the prompt per spec §4.H
    /// step 1.
    fn prepare_prompt<'p>(&self, prompt_tokens: &'p [u32], options: &GenerationOptions) -> Result<&'p [u32], GenError> {
        let (max_input, max_context) = self.resolved_input_and_context_limits(options);
        let limit = max_input.min(max_context);

        if prompt_tokens.len() <= limit {
            return Ok(prompt_tokens);
        }
        if !options.truncate_input_on_overflow {
            return Err(GenError::InputTooLong {
                got: prompt_tokens.len(),
                limit,
            });
        }
        Ok(&prompt_tokens[prompt_tokens.len() - limit..])
    }

    /// Samples the next token against the logits already sitting in the
    /// workspace, unless the cache has no room left to hold it — the
    /// context-full check gates every emitted token, including the
    /// very first one sampled straight from the prefill logits, since a
    /// prompt that already fills the cache must emit nothing at all.
    fn next_token_or_context_full(
        &mut self,
        max_context: usize,
        options: &GenerationOptions,
        rng: &mut Rng,
    ) -> Result<Result<u32, FinishReason>, GenError> {
        if self.cache.current_length(0) + 1 > max_context {
            return Ok(Err(FinishReason::ContextFull));
        }
        let logits = self.workspace.get_mut("logits", self.model.config.vocab_size)
            .map_err(|e| GenError::Other(e.to_string()))?;
        Ok(Ok(sample(logits, options.sampling, rng)? as u32))
    }

    /// Runs one decode step for `prev_token` and samples the token that
    /// follows it. This is the unit of work a streaming consumer gets
    /// per `next()` call: one forward pass, one sample, one
    /// context-full check, nothing eager beyond it.
    fn advance(
        &mut self,
        prev_token: u32,
        max_context: usize,
        options: &GenerationOptions,
        rng: &mut Rng,
    ) -> Result<Result<u32, FinishReason>, GenError> {
        match decode_step(&self.model, &mut self.workspace, &mut self.cache, prev_token, |_| Ok(())) {
            Ok(()) => {}
            Err(GenError::ContextFull { .. }) => return Ok(Err(FinishReason::ContextFull)),
            Err(e) => return Err(e),
        }
        self.next_token_or_context_full(max_context, options, rng)
    }

    /// Runs the full generation loop (spec §4.H steps 2-5), pushing
    /// every emitted `(token_id, generation_index)` pair through
    /// `on_token`. Used by the blocking entry point; the streaming
    /// entry point drives `next_token_or_context_full`/`advance`
    /// directly instead, one token per `next()` call.
    fn run_loop(
        &mut self,
        prompt_tokens: &[u32],
        options: &GenerationOptions,
        cancel: &CancellationToken,
        mut on_token: impl FnMut(u32, u32),
    ) -> Result<(Vec<u32>, FinishReason, Usage), GenError> {
        self.state = SessionState::Running;
        self.emit(MetricEvent::RequestStart);
        let start = Instant::now();

        let prompt = match self.prepare_prompt(prompt_tokens, options) {
            Ok(p) => p,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        if prompt.len() < prompt_tokens.len() {
            self.emit(MetricEvent::ContextPolicyApplied {
                dropped_tokens: prompt_tokens.len() - prompt.len(),
            });
        }

        let deadline_ms = options.max_wall_ms as u128;
        let mut rng = Rng::from_seed(options.seed);
        let mut tokens = Vec::with_capacity(options.max_new_tokens as usize);
        let max_context = (options.max_context_tokens as usize).min(self.model.config.max_context_tokens);

        let result: Result<FinishReason, GenError> = (|| {
            prefill(&self.model, &mut self.workspace, &mut self.cache, prompt, |_| Ok(()))?;
            self.emit(MetricEvent::FirstToken {
                elapsed_ms: start.elapsed().as_millis() as u64,
            });

            // The token sampled from the prefill logits is otherwise
            // unconditional (spec step 3): cancellation, the wall-clock
            // deadline, and the token budget are only checked for every
            // token after it (spec step 4's loop). Context-full is the
            // one exception — it must gate this first token too, since
            // a prompt that already saturates the cache emits nothing.
            let mut next_token = match self.next_token_or_context_full(max_context, options, &mut rng)? {
                Ok(t) => t,
                Err(reason) => return Ok(reason),
            };
            tokens.push(next_token);
            on_token(next_token, 0);
            self.emit(MetricEvent::TokenEmitted { index: 0 });

            if options.stop_tokens.contains(&next_token) {
                return Ok(FinishReason::Stop);
            }

            loop {
                if cancel.is_cancelled() {
                    return Ok(FinishReason::Cancelled);
                }
                if start.elapsed().as_millis() > deadline_ms {
                    return Ok(FinishReason::Deadline);
                }
                if tokens.len() >= options.max_new_tokens as usize {
                    return Ok(FinishReason::MaxTokens);
                }

                next_token = match self.advance(next_token, max_context, options, &mut rng)? {
                    Ok(t) => t,
                    Err(reason) => return Ok(reason),
                };
                tokens.push(next_token);
                on_token(next_token, tokens.len() as u32 - 1);
                self.emit(MetricEvent::TokenEmitted {
                    index: tokens.len() as u32 - 1,
                });

                if options.stop_tokens.contains(&next_token) {
                    return Ok(FinishReason::Stop);
                }
            }
        })();

        let wall_ms = start.elapsed().as_millis() as u64;
        let usage = Usage {
            prompt_tokens: prompt.len(),
            generated_tokens: tokens.len(),
            ttft_ms: wall_ms,
            wall_ms,
        };

        match &result {
            Ok(FinishReason::Cancelled) => {
                self.state = SessionState::Cancelled;
                self.emit(MetricEvent::RequestComplete {
                    tokens_generated: usage.generated_tokens as u32,
                    wall_ms,
                });
            }
            Ok(_) => {
                self.state = SessionState::Completed;
                self.emit(MetricEvent::RequestComplete {
                    tokens_generated: usage.generated_tokens as u32,
                    wall_ms,
                });
            }
            Err(GenError::KvBudgetExceeded) => {
                self.emit(MetricEvent::KvBudgetExceeded);
                self.state = SessionState::Failed;
            }
            Err(_) => {
                self.state = SessionState::Failed;
            }
        }

        let finish = result?;
        Ok((tokens, finish, usage))
    }

    /// Blocking generation: runs the full loop to completion and
    /// returns every emitted token at once, plus usage.
    pub fn generate(
        &mut self,
        prompt_tokens: &[u32],
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<GenerationResult, GenError> {
        let (tokens, finish_reason, usage) = self.run_loop(prompt_tokens, options, cancel, |_, _| {})?;
        Ok(GenerationResult {
            tokens,
            finish_reason,
            usage,
        })
    }

    /// Streaming generation: returns a lazy sequence of
    /// `(token_id, generation_index)` results. Each `.next()` call on
    /// the returned stream runs exactly one decode step, so
    /// cancellation and the wall-clock deadline are observed between
    /// tokens rather than all at once (spec §9: "suspension is
    /// cooperative and only between tokens"). A clean stop (`Stop` or
    /// `MaxTokens`) ends the sequence with `None`; any other
    /// termination — cancellation, deadline, context-full, or a
    /// decode error — is yielded as the final item, an `Err`, per
    /// spec §7.
    ///
    /// Only the prompt is validated and prefilled eagerly before this
    /// returns; no generated token is produced until the caller pulls
    /// the stream.
    pub fn generate_streaming(
        &mut self,
        prompt_tokens: &[u32],
        options: &GenerationOptions,
        cancel: &CancellationToken,
    ) -> Result<GenerationStream<'_>, GenError> {
        self.state = SessionState::Streaming;
        self.emit(MetricEvent::RequestStart);
        let start = Instant::now();

        let prompt = match self.prepare_prompt(prompt_tokens, options) {
            Ok(p) => p,
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        };
        let prompt_len = prompt.len();
        if prompt_len < prompt_tokens.len() {
            self.emit(MetricEvent::ContextPolicyApplied {
                dropped_tokens: prompt_tokens.len() - prompt_len,
            });
        }

        if let Err(e) = prefill(&self.model, &mut self.workspace, &mut self.cache, prompt, |_| Ok(())) {
            self.state = SessionState::Failed;
            return Err(e);
        }
        self.emit(MetricEvent::FirstToken {
            elapsed_ms: start.elapsed().as_millis() as u64,
        });

        let max_context = (options.max_context_tokens as usize).min(self.model.config.max_context_tokens);
        Ok(GenerationStream {
            session: self,
            options: options.clone(),
            cancel: cancel.clone(),
            rng: Rng::from_seed(options.seed),
            start,
            deadline_ms: options.max_wall_ms as u128,
            max_context,
            prompt_tokens: prompt_len,
            generated: 0,
            last_token: None,
            done: false,
        })
    }
}

/// Lazy, finite sequence of `(token_id, generation_index)` results
/// produced by [`InferenceSession::generate_streaming`]. Holding the
/// session by `&mut` is what makes this lazy: each `next()` call
/// borrows it just long enough to run one decode step and sample one
/// token, then releases it until the caller asks for another.
pub struct GenerationStream<'a> {
    session: &'a mut InferenceSession,
    options: GenerationOptions,
    cancel: CancellationToken,
    rng: Rng,
    start: Instant,
    deadline_ms: u128,
    max_context: usize,
    prompt_tokens: usize,
    generated: u32,
    last_token: Option<u32>,
    done: bool,
}

impl<'a> GenerationStream<'a> {
    /// Usage as of right now: `generated_tokens` and the timings grow
    /// with every `next()` call until the stream ends.
    pub fn usage(&self) -> Usage {
        let wall_ms = self.start.elapsed().as_millis() as u64;
        Usage {
            prompt_tokens: self.prompt_tokens,
            generated_tokens: self.generated as usize,
            ttft_ms: wall_ms,
            wall_ms,
        }
    }

    fn finish(&mut self, reason: FinishReason) {
        self.done = true;
        let wall_ms = self.start.elapsed().as_millis() as u64;
        self.session.state = if reason == FinishReason::Cancelled {
            SessionState::Cancelled
        } else if reason == FinishReason::Error {
            SessionState::Failed
        } else {
            SessionState::Completed
        };
        if reason != FinishReason::Error {
            self.session.emit(MetricEvent::RequestComplete {
                tokens_generated: self.generated,
                wall_ms,
            });
        }
    }

    fn terminal_error(&self, reason: FinishReason) -> GenError {
        match reason {
            FinishReason::Cancelled => GenError::Cancelled,
            FinishReason::Deadline => GenError::DeadlineExceeded {
                deadline_ms: self.options.max_wall_ms,
            },
            FinishReason::ContextFull => GenError::ContextFull {
                current_length: self.session.cache.current_length(0),
                max_context_tokens: self.max_context,
            },
            FinishReason::Stop | FinishReason::MaxTokens | FinishReason::Error => {
                unreachable!("Stop/MaxTokens end the stream without an error item, Error already carries its own GenError")
            }
        }
    }
}

impl<'a> Iterator for GenerationStream<'a> {
    type Item = Result<(u32, u32), GenError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let step = match self.last_token {
            None => self.session.next_token_or_context_full(self.max_context, &self.options, &mut self.rng),
            Some(prev) => {
                if self.cancel.is_cancelled() {
                    Ok(Err(FinishReason::Cancelled))
                } else if self.start.elapsed().as_millis() > self.deadline_ms {
                    Ok(Err(FinishReason::Deadline))
                } else if self.generated >= self.options.max_new_tokens {
                    Ok(Err(FinishReason::MaxTokens))
                } else {
                    self.session.advance(prev, self.max_context, &self.options, &mut self.rng)
                }
            }
        };

        match step {
            Ok(Ok(token)) => {
                let index = self.generated;
                self.generated += 1;
                self.last_token = Some(token);
                self.session.emit(MetricEvent::TokenEmitted { index });
                if self.options.stop_tokens.contains(&token) {
                    self.finish(FinishReason::Stop);
                }
                Some(Ok((token, index)))
            }
            Ok(Err(reason @ (FinishReason::Stop | FinishReason::MaxTokens))) => {
                self.finish(reason);
                None
            }
            Ok(Err(reason)) => {
                let err = self.terminal_error(reason);
                self.finish(reason);
                Some(Err(err))
            }
            Err(e) => {
                if let GenError::KvBudgetExceeded = &e {
                    self.session.emit(MetricEvent::KvBudgetExceeded);
                }
                self.finish(FinishReason::Error);
                Some(Err(e))
            }
        }
    }
}
