//! Generation session: per-session state, sampler lifecycle, and rewind.
//!
//! A session borrows a shared model, owns at most one sampler at a time, and
//! records the progress of one generation. The decode loop that drives it
//! lives with the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, warn};

use cactus_core::{
    CactusError, ContextParams, FinishReason, ModelHandle, Result, SampleResult, Sampler,
    SamplerFactory, TokenProbs,
};

/// Cloneable handle a host can use to ask a running generation to stop.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Progress and termination state of the current generation.
#[derive(Debug, Default)]
pub struct GenerationState {
    pub is_predicting: bool,
    pub num_prompt_tokens: usize,
    pub num_tokens_predicted: usize,
    /// Tokens already evaluated into the context.
    pub n_past: usize,
    /// Tokens left in the prediction budget.
    pub n_remain: i64,
    pub generated_text: String,
    pub generated_token_probs: Vec<TokenProbs>,
    /// Tokens waiting to be evaluated.
    pub embd: Vec<u32>,
    pub truncated: bool,
    /// The output ends in an unfinished multi-byte character.
    pub incomplete: bool,
    pub stopped_eos: bool,
    pub stopped_word: bool,
    pub stopped_limit: bool,
    pub stopping_word: String,
}

/// How `find_stopping_strings` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// A stop string occurs in the text.
    Full,
    /// The text ends with a prefix of a stop string.
    Partial,
}

pub struct Session {
    params: ContextParams,
    model: Option<ModelHandle>,
    sampler_factory: Arc<dyn SamplerFactory>,
    sampler: Option<Box<dyn Sampler>>,
    interrupt: InterruptHandle,
    state: GenerationState,
}

impl Session {
    /// Create a session bound to `model`, with no sampler yet. A session
    /// created without a model can be bound later with `bind_model`.
    pub fn new(
        params: ContextParams,
        model: Option<ModelHandle>,
        sampler_factory: Arc<dyn SamplerFactory>,
    ) -> Self {
        Self {
            params,
            model,
            sampler_factory,
            sampler: None,
            interrupt: InterruptHandle::default(),
            state: GenerationState::default(),
        }
    }

    pub fn bind_model(&mut self, model: ModelHandle) {
        self.model = Some(model);
    }

    /// Drop this session's hold on the model. The active sampler, if any, is
    /// left alone.
    pub fn unbind_model(&mut self) -> Option<ModelHandle> {
        self.model.take()
    }

    pub fn model(&self) -> Option<&ModelHandle> {
        self.model.as_ref()
    }

    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut ContextParams {
        &mut self.params
    }

    /// Context length of the session, in tokens.
    pub fn n_ctx(&self) -> usize {
        self.params.n_ctx
    }

    pub fn state(&self) -> &GenerationState {
        &self.state
    }

    /// Mutable generation state, for the decode loop.
    pub fn state_mut(&mut self) -> &mut GenerationState {
        &mut self.state
    }

    pub fn has_sampler(&self) -> bool {
        self.sampler.is_some()
    }

    pub fn sampler(&self) -> Option<&dyn Sampler> {
        self.sampler.as_deref()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Restore the pre-generation baseline. The sampler is not touched; see
    /// `reset_sampler` and `init_sampling`.
    pub fn rewind(&mut self) {
        self.interrupt.clear();
        self.params.antiprompt.clear();
        self.params.sampling.grammar.clear();

        let mut generated_text = std::mem::take(&mut self.state.generated_text);
        generated_text.clear();
        generated_text.reserve(self.params.n_ctx);

        self.state = GenerationState {
            generated_text,
            ..GenerationState::default()
        };
    }

    /// Replace the sampler with a fresh one for the bound model and the current
    /// sampling parameters. Any previous sampler is released first, whatever
    /// the outcome. Returns whether a sampler is active afterwards.
    pub fn init_sampling(&mut self) -> bool {
        match self.try_init_sampling() {
            Ok(()) => true,
            Err(CactusError::ModelNotLoaded) => {
                error!("cannot initialize sampling context: model is not loaded");
                false
            }
            Err(e) => {
                warn!(error = %e, "sampler creation failed");
                false
            }
        }
    }

    /// `init_sampling` with the failure cause, and without logging it.
    pub fn try_init_sampling(&mut self) -> Result<()> {
        self.release_sampler();

        let model = self.model.as_ref().ok_or(CactusError::ModelNotLoaded)?;
        let sampler = self
            .sampler_factory
            .create(model.as_ref(), &self.params.sampling)?;

        self.sampler = Some(sampler);
        self.params.sampling.n_prev = self.params.n_ctx;
        debug!(n_prev = self.params.sampling.n_prev, "sampling context initialized");
        Ok(())
    }

    /// Release the active sampler, if any. Safe to call repeatedly.
    pub fn release_sampler(&mut self) {
        if self.sampler.take().is_some() {
            debug!("sampling context released");
        }
    }

    /// Clear the active sampler's token history and grammar position.
    pub fn reset_sampler(&mut self) -> Result<()> {
        let sampler = self
            .sampler
            .as_mut()
            .ok_or(CactusError::SamplerNotInitialized)?;
        sampler.reset();
        Ok(())
    }

    /// Mark the start of a generation over a prompt of `num_prompt_tokens`
    /// tokens. The prediction budget comes from `n_predict`; a negative value
    /// allows whatever room is left in the context.
    pub fn begin_completion(&mut self, num_prompt_tokens: usize) {
        let room = self.params.n_ctx.saturating_sub(num_prompt_tokens) as i64;
        let n_predict = i64::from(self.params.n_predict);
        self.state.num_prompt_tokens = num_prompt_tokens;
        self.state.n_remain = if n_predict < 0 { room } else { n_predict.min(room) };
        self.state.is_predicting = true;
    }

    /// Sample and accept the next token, then update the counters and the
    /// end-of-sequence flag. Inside a completion started with
    /// `begin_completion` the budget is also spent and the limit flag set.
    /// Records the top `n_probs` candidates when the sampling parameters ask
    /// for them.
    pub fn sample(&mut self, logits: &[f32]) -> Result<SampleResult> {
        let sampler = self
            .sampler
            .as_mut()
            .ok_or(CactusError::SamplerNotInitialized)?;
        let model = self.model.as_ref().ok_or(CactusError::ModelNotLoaded)?;

        let n_probs = self.params.sampling.n_probs;
        let result = sampler.sample(logits, n_probs)?;
        sampler.accept(result.token_id);

        let state = &mut self.state;
        if n_probs > 0 {
            state.generated_token_probs.push(TokenProbs {
                token_id: result.token_id,
                probs: result.top_probs.clone(),
            });
        }
        state.num_tokens_predicted += 1;
        if model.is_eos(result.token_id) {
            state.stopped_eos = true;
            state.is_predicting = false;
        } else if state.is_predicting {
            state.n_remain -= 1;
            if state.n_remain <= 0 {
                state.stopped_limit = true;
                state.is_predicting = false;
            }
        }
        Ok(result)
    }

    /// Search `text` for the configured stop strings and return the byte offset
    /// of the earliest hit.
    ///
    /// A `Full` search only looks at the tail that the last token could have
    /// completed (`last_token_size` bytes plus the stop string length) and
    /// marks the generation as stopped by that word. A `Partial` search reports
    /// where a stop string may be starting at the end of `text` so the caller
    /// can hold that suffix back.
    pub fn find_stopping_strings(
        &mut self,
        text: &str,
        last_token_size: usize,
        kind: StopKind,
    ) -> Option<usize> {
        let mut stop_pos: Option<usize> = None;

        for word in &self.params.antiprompt {
            let pos = match kind {
                StopKind::Full => {
                    let tail = word.len() + last_token_size;
                    let from = text.len().saturating_sub(tail);
                    find_bytes(text.as_bytes(), word.as_bytes(), from)
                }
                StopKind::Partial => find_partial_stop(word.as_bytes(), text.as_bytes()),
            };

            if let Some(pos) = pos {
                if stop_pos.is_none_or(|current| pos < current) {
                    if kind == StopKind::Full {
                        self.state.stopping_word = word.clone();
                        self.state.stopped_word = true;
                    }
                    stop_pos = Some(pos);
                }
            }
        }

        stop_pos
    }

    /// Why the last generation ended, if it has.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        if self.is_interrupted() {
            Some(FinishReason::Cancelled)
        } else if self.state.stopped_eos {
            Some(FinishReason::EosToken)
        } else if self.state.stopped_word {
            Some(FinishReason::StopString)
        } else if self.state.stopped_limit {
            Some(FinishReason::MaxTokens)
        } else {
            None
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_sampler();
    }
}

fn find_bytes(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Offset at which a prefix of `stop` ends `text`, trying the longest prefix first.
fn find_partial_stop(stop: &[u8], text: &[u8]) -> Option<usize> {
    let &last = text.last()?;
    (0..stop.len())
        .rev()
        .filter(|&i| stop[i] == last)
        .find(|&i| text.ends_with(&stop[..=i]))
        .map(|i| text.len() - i - 1)
}
