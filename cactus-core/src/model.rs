use std::sync::Arc;

/// Read-only metadata describing a loaded model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub vocab_size: usize,
    pub eos_token_id: u32,
}

/// A loaded model and its inference context.
///
/// Sessions only ever read through this trait. Loading, tokenization, and the
/// forward pass live with the implementor.
pub trait Model: Send + Sync {
    fn config(&self) -> &ModelConfig;

    /// Text of a single vocabulary entry, or `None` for special/unknown ids.
    fn token_text(&self, token_id: u32) -> Option<String>;

    fn is_eos(&self, token_id: u32) -> bool {
        token_id == self.config().eos_token_id
    }
}

/// Shared handle to a loaded model. Many sessions may hold one; the model is
/// torn down when the last holder drops it.
pub type ModelHandle = Arc<dyn Model>;
