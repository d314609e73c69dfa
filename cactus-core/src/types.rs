use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CactusError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: Option<usize>,
    pub min_p: Option<f32>,
    pub repetition_penalty: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    /// How many of the most recent tokens the penalties look at (0 = none).
    pub penalty_last_n: usize,
    /// Size of the accepted-token history a sampler keeps.
    pub n_prev: usize,
    /// Number of top candidate probabilities to record per token (0 = off).
    pub n_probs: usize,
    /// Regular expression the generated text must follow. Empty = unconstrained.
    pub grammar: String,
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 0.95,
            top_k: Some(40),
            min_p: Some(0.05),
            repetition_penalty: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            penalty_last_n: 64,
            n_prev: 64,
            n_probs: 0,
            grammar: String::new(),
            seed: None,
        }
    }
}

/// Per-session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextParams {
    /// Context length of the session, in tokens.
    pub n_ctx: usize,
    /// Maximum tokens to predict per generation (-1 = until context is full).
    pub n_predict: i32,
    /// Stop strings: generation ends when any of them appears in the output.
    pub antiprompt: Vec<String>,
    pub sampling: SamplingParams,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_predict: -1,
            antiprompt: Vec::new(),
            sampling: SamplingParams::default(),
        }
    }
}

impl ContextParams {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
            .map_err(|e| CactusError::Config(format!("{}: {e}", path.display())))
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_ctx == 0 {
            return Err(CactusError::Config("n_ctx must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.sampling.top_p) {
            return Err(CactusError::Config(format!(
                "top_p must be within [0, 1], got {}",
                self.sampling.top_p
            )));
        }
        if self.sampling.temperature < 0.0 {
            return Err(CactusError::Config(format!(
                "temperature must not be negative, got {}",
                self.sampling.temperature
            )));
        }
        Ok(())
    }
}

/// Probabilities recorded for one generated token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenProbs {
    pub token_id: u32,
    /// Top candidates as (token id, probability), most likely first.
    pub probs: Vec<(u32, f32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinishReason {
    MaxTokens,
    EosToken,
    StopString,
    Cancelled,
}
