use crate::model::Model;
use crate::types::SamplingParams;
use crate::Result;

#[derive(Debug, Clone)]
pub struct SampleResult {
    pub token_id: u32,
    pub logprob: f32,
    /// Post-filter probability distribution, sorted by descending probability.
    /// Only populated when the caller asked for it.
    pub top_probs: Vec<(u32, f32)>,
}

/// A live sampler instance.
///
/// The instance is released when the box holding it is dropped.
pub trait Sampler: Send {
    /// Pick the next token from one row of logits. `n_probs` > 0 requests the
    /// top candidates in `SampleResult::top_probs`.
    fn sample(&mut self, logits: &[f32], n_probs: usize) -> Result<SampleResult>;

    /// Record a token chosen for the sequence (updates penalty history and
    /// grammar state).
    fn accept(&mut self, token_id: u32);

    /// Forget accepted-token history and rewind grammar state.
    fn reset(&mut self);

    /// Accepted tokens still inside the history window, oldest first.
    fn last_tokens(&self) -> Vec<u32>;
}

/// The sampling subsystem: produces sampler instances for a model.
pub trait SamplerFactory: Send + Sync {
    fn create(&self, model: &dyn Model, params: &SamplingParams) -> Result<Box<dyn Sampler>>;
}
