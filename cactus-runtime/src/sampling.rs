use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use cactus_core::{
    CactusError, Model, Result, SampleResult, Sampler, SamplerFactory, SamplingParams,
};

use crate::constraints::regex::compile_grammar;
use crate::constraints::{Grammar, TokenVocab};

/// Penalty and temperature stage, run on raw logits before any filtering.
///
/// Penalties only look at the most recent `penalty_last_n` accepted tokens.
/// Each distinct token in that window gets the repetition penalty once, plus
/// the presence penalty and a frequency penalty scaled by its count.
pub struct LogitAdjuster {
    temperature: f32,
    repetition_penalty: f32,
    presence_penalty: f32,
    frequency_penalty: f32,
    penalty_last_n: usize,
}

impl LogitAdjuster {
    pub fn new(params: &SamplingParams) -> Self {
        Self {
            temperature: params.temperature,
            repetition_penalty: params.repetition_penalty,
            presence_penalty: params.presence_penalty,
            frequency_penalty: params.frequency_penalty,
            penalty_last_n: params.penalty_last_n,
        }
    }

    fn has_penalties(&self) -> bool {
        (self.repetition_penalty - 1.0).abs() >= f32::EPSILON
            || self.presence_penalty.abs() >= f32::EPSILON
            || self.frequency_penalty.abs() >= f32::EPSILON
    }

    /// `history` is the accepted-token history, oldest first.
    pub fn adjust(&self, logits: &mut [f32], history: &[u32]) {
        let recent = &history[history.len().saturating_sub(self.penalty_last_n)..];
        if !recent.is_empty() && self.has_penalties() {
            for (token_id, count) in count_tokens(recent) {
                let Some(logit) = logits.get_mut(token_id as usize) else {
                    continue;
                };
                if *logit > 0.0 {
                    *logit /= self.repetition_penalty;
                } else {
                    *logit *= self.repetition_penalty;
                }
                *logit -= self.presence_penalty + self.frequency_penalty * count as f32;
            }
        }

        if self.temperature > 0.0 && (self.temperature - 1.0).abs() >= f32::EPSILON {
            logits.iter_mut().for_each(|l| *l /= self.temperature);
        }
    }
}

/// Creates `CommonSampler`s: the default sampling subsystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommonSamplerFactory;

impl SamplerFactory for CommonSamplerFactory {
    fn create(&self, model: &dyn Model, params: &SamplingParams) -> Result<Box<dyn Sampler>> {
        Ok(Box::new(CommonSampler::new(model, params)?))
    }
}

/// CPU sampler with a bounded accepted-token history and an optional grammar.
pub struct CommonSampler {
    params: SamplingParams,
    adjuster: LogitAdjuster,
    history: VecDeque<u32>,
    grammar: Option<Grammar>,
    /// Stays selectable once the grammar has been fully matched.
    eos_token_id: u32,
    rng: StdRng,
}

impl CommonSampler {
    pub fn new(model: &dyn Model, params: &SamplingParams) -> Result<Self> {
        let vocab_size = model.config().vocab_size;
        if vocab_size == 0 {
            return Err(CactusError::InvalidArgument("model vocabulary is empty".into()));
        }

        let grammar = if params.grammar.is_empty() {
            None
        } else {
            let vocab = TokenVocab::from_model(model);
            Some(compile_grammar(&params.grammar, &vocab)?)
        };

        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        debug!(
            vocab_size,
            n_prev = params.n_prev,
            grammar = grammar.is_some(),
            "sampler created"
        );

        Ok(Self {
            params: params.clone(),
            adjuster: LogitAdjuster::new(params),
            history: VecDeque::with_capacity(params.n_prev),
            grammar,
            eos_token_id: model.config().eos_token_id,
            rng,
        })
    }

    fn greedy(&self, logits: &[f32], n_probs: usize) -> Result<SampleResult> {
        let (token_id, _) = logits
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .ok_or_else(|| CactusError::InvalidArgument("empty logits".into()))?;

        let probs = softmax(logits);
        Ok(SampleResult {
            token_id: token_id as u32,
            logprob: ln(probs[token_id]),
            top_probs: top_n(&probs, n_probs),
        })
    }

    fn multinomial(&mut self, probs: &[f32], n_probs: usize) -> SampleResult {
        let r: f32 = self.rng.r#gen();
        let mut cumulative = 0.0;
        let mut chosen = probs.len() - 1;
        for (i, &p) in probs.iter().enumerate() {
            cumulative += p;
            if p > 0.0 && cumulative >= r {
                chosen = i;
                break;
            }
        }
        // Rounding can leave `r` above the final cumulative sum.
        if probs[chosen] <= 0.0 {
            chosen = probs
                .iter()
                .rposition(|&p| p > 0.0)
                .unwrap_or(chosen);
        }
        SampleResult {
            token_id: chosen as u32,
            logprob: ln(probs[chosen]),
            top_probs: top_n(probs, n_probs),
        }
    }
}

impl Sampler for CommonSampler {
    fn sample(&mut self, logits: &[f32], n_probs: usize) -> Result<SampleResult> {
        if logits.is_empty() {
            return Err(CactusError::InvalidArgument("empty logits".into()));
        }

        let mut processed = logits.to_vec();
        self.adjuster.adjust(&mut processed, self.history.make_contiguous());

        if let Some(grammar) = &self.grammar {
            let eos = self.eos_token_id as usize;
            let eos_logit = processed.get(eos).copied();
            grammar.mask_logits(&mut processed);
            if grammar.is_complete() {
                if let (Some(slot), Some(value)) = (processed.get_mut(eos), eos_logit) {
                    *slot = value;
                }
            }
            if processed.iter().all(|l| *l == f32::NEG_INFINITY) {
                return Err(CactusError::Grammar("no token satisfies the grammar".into()));
            }
        }

        if self.params.temperature <= 0.0 {
            return self.greedy(&processed, n_probs);
        }

        let mut probs = softmax(&processed);

        if let Some(k) = self.params.top_k {
            apply_top_k(&mut probs, k);
        }
        if self.params.top_p < 1.0 {
            apply_top_p(&mut probs, self.params.top_p);
        }
        if let Some(min_p) = self.params.min_p {
            apply_min_p(&mut probs, min_p);
        }

        let sum: f32 = probs.iter().sum();
        if sum <= 0.0 {
            // Filtering removed all mass; fall back to argmax of the processed logits.
            return self.greedy(&processed, n_probs);
        }
        for p in probs.iter_mut() {
            *p /= sum;
        }

        Ok(self.multinomial(&probs, n_probs))
    }

    fn accept(&mut self, token_id: u32) {
        if self.params.n_prev > 0 {
            if self.history.len() == self.params.n_prev {
                self.history.pop_front();
            }
            self.history.push_back(token_id);
        }
        if let Some(grammar) = &mut self.grammar {
            grammar.accept(token_id);
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        if let Some(grammar) = &mut self.grammar {
            grammar.reset();
        }
    }

    fn last_tokens(&self) -> Vec<u32> {
        self.history.iter().copied().collect()
    }
}

fn ln(p: f32) -> f32 {
    if p > 0.0 { p.ln() } else { f32::NEG_INFINITY }
}

fn count_tokens(tokens: &[u32]) -> HashMap<u32, usize> {
    let mut counts = HashMap::new();
    for &t in tokens {
        *counts.entry(t).or_insert(0) += 1;
    }
    counts
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices sorted by descending probability.
fn ranked(probs: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));
    order
}

fn top_n(probs: &[f32], n: usize) -> Vec<(u32, f32)> {
    if n == 0 {
        return Vec::new();
    }
    ranked(probs)
        .into_iter()
        .take(n)
        .map(|i| (i as u32, probs[i]))
        .collect()
}

/// Keep only the k most likely tokens. `k == 0` disables the filter.
fn apply_top_k(probs: &mut [f32], k: usize) {
    if k == 0 || k >= probs.len() {
        return;
    }
    for i in ranked(probs).into_iter().skip(k) {
        probs[i] = 0.0;
    }
}

/// Keep the smallest set of tokens whose cumulative probability exceeds `top_p`.
fn apply_top_p(probs: &mut [f32], top_p: f32) {
    let order = ranked(probs);
    let mut cumulative = 0.0;
    let mut cutoff = order.len();
    for (rank, &i) in order.iter().enumerate() {
        cumulative += probs[i];
        if cumulative > top_p {
            cutoff = rank + 1;
            break;
        }
    }
    for &i in &order[cutoff..] {
        probs[i] = 0.0;
    }
}

/// Drop tokens less likely than `min_p` times the most likely one.
fn apply_min_p(probs: &mut [f32], min_p: f32) {
    let threshold = min_p * probs.iter().copied().fold(0.0f32, f32::max);
    for p in probs.iter_mut() {
        if *p < threshold {
            *p = 0.0;
        }
    }
}
