use cactus_core::{Model, ModelConfig, Sampler, SamplerFactory, SamplingParams};
use cactus_runtime::sampling::{CommonSampler, CommonSamplerFactory, LogitAdjuster};

struct TestModel {
    config: ModelConfig,
    vocab: Vec<String>,
}

impl TestModel {
    fn new(tokens: &[&str]) -> Self {
        Self::with_eos(tokens, 0)
    }

    fn with_eos(tokens: &[&str], eos_token_id: u32) -> Self {
        Self {
            config: ModelConfig {
                vocab_size: tokens.len(),
                eos_token_id,
            },
            vocab: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl Model for TestModel {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn token_text(&self, token_id: u32) -> Option<String> {
        self.vocab.get(token_id as usize).cloned()
    }
}

fn greedy_params() -> SamplingParams {
    SamplingParams {
        temperature: 0.0,
        ..Default::default()
    }
}

#[test]
fn test_greedy_sampling() {
    let model = TestModel::new(&["a", "b", "c", "d"]);
    let mut sampler = CommonSampler::new(&model, &greedy_params()).unwrap();
    let result = sampler.sample(&[0.1, 0.3, 0.9, 0.2], 0).unwrap();
    assert_eq!(result.token_id, 2);
    assert!(result.top_probs.is_empty());
}

#[test]
fn test_temperature_scaling() {
    let mut logits = vec![1.0, 2.0, 3.0];
    let params = SamplingParams {
        temperature: 0.5,
        ..Default::default()
    };
    LogitAdjuster::new(&params).adjust(&mut logits, &[]);
    assert!((logits[0] - 2.0).abs() < 1e-5);
    assert!((logits[1] - 4.0).abs() < 1e-5);
    assert!((logits[2] - 6.0).abs() < 1e-5);
}

#[test]
fn test_repetition_penalty_signs() {
    let mut logits = vec![-1.0, 2.0, 3.0];
    let params = SamplingParams {
        repetition_penalty: 2.0,
        temperature: 1.0,
        ..Default::default()
    };
    LogitAdjuster::new(&params).adjust(&mut logits, &[0, 1, 1]);
    // Negative logits are pushed further down, positive ones divided, once each.
    assert!((logits[0] - (-2.0)).abs() < 1e-5);
    assert!((logits[1] - 1.0).abs() < 1e-5);
    assert!((logits[2] - 3.0).abs() < 1e-5);
}

#[test]
fn test_presence_and_frequency_penalties() {
    let mut logits = vec![1.0, 1.0, 1.0];
    let params = SamplingParams {
        temperature: 1.0,
        presence_penalty: 0.5,
        frequency_penalty: 0.25,
        ..Default::default()
    };
    LogitAdjuster::new(&params).adjust(&mut logits, &[0, 0, 1]);
    assert!((logits[0] - 0.0).abs() < 1e-5); // 1.0 - (0.5 + 2 * 0.25)
    assert!((logits[1] - 0.25).abs() < 1e-5); // 1.0 - (0.5 + 0.25)
    assert!((logits[2] - 1.0).abs() < 1e-5);
}

#[test]
fn test_penalties_limited_to_last_n() {
    let mut logits = vec![2.0, 2.0, 2.0];
    let params = SamplingParams {
        temperature: 1.0,
        repetition_penalty: 2.0,
        penalty_last_n: 2,
        ..Default::default()
    };
    // Token 0 is older than the last two tokens and is left alone.
    LogitAdjuster::new(&params).adjust(&mut logits, &[0, 1, 2]);
    assert!((logits[0] - 2.0).abs() < 1e-5);
    assert!((logits[1] - 1.0).abs() < 1e-5);
    assert!((logits[2] - 1.0).abs() < 1e-5);

    let mut logits = vec![2.0, 2.0];
    let params = SamplingParams {
        penalty_last_n: 0,
        ..params
    };
    LogitAdjuster::new(&params).adjust(&mut logits, &[0, 1]);
    assert_eq!(logits, vec![2.0, 2.0]);
}

#[test]
fn test_penalty_uses_accepted_history() {
    let model = TestModel::new(&["a", "b"]);
    let params = SamplingParams {
        temperature: 0.0,
        repetition_penalty: 4.0,
        ..Default::default()
    };
    let mut sampler = CommonSampler::new(&model, &params).unwrap();
    let logits = [2.0, 1.0];

    assert_eq!(sampler.sample(&logits, 0).unwrap().token_id, 0);
    sampler.accept(0);
    // 2.0 / 4.0 now loses to 1.0.
    assert_eq!(sampler.sample(&logits, 0).unwrap().token_id, 1);

    sampler.reset();
    assert_eq!(sampler.sample(&logits, 0).unwrap().token_id, 0);
}

#[test]
fn test_history_is_bounded_by_n_prev() {
    let model = TestModel::new(&["a", "b", "c"]);
    let params = SamplingParams {
        n_prev: 2,
        ..greedy_params()
    };
    let mut sampler = CommonSampler::new(&model, &params).unwrap();
    for token in [0, 1, 2] {
        sampler.accept(token);
    }
    assert_eq!(sampler.last_tokens(), vec![1, 2]);

    sampler.reset();
    assert!(sampler.last_tokens().is_empty());
}

#[test]
fn test_seeded_sampling_reproducible() {
    let model = TestModel::new(&["a", "b", "c", "d"]);
    let params = SamplingParams {
        temperature: 1.0,
        top_k: None,
        min_p: None,
        top_p: 1.0,
        seed: Some(42),
        ..Default::default()
    };
    let logits = [1.0, 1.0, 1.0, 1.0];

    let mut first = CommonSampler::new(&model, &params).unwrap();
    let mut second = CommonSampler::new(&model, &params).unwrap();
    for _ in 0..8 {
        let a = first.sample(&logits, 0).unwrap();
        let b = second.sample(&logits, 0).unwrap();
        assert_eq!(a.token_id, b.token_id);
    }
}

#[test]
fn test_top_k_one_is_deterministic() {
    let model = TestModel::new(&["a", "b", "c", "d"]);
    let params = SamplingParams {
        temperature: 1.0,
        top_k: Some(1),
        ..Default::default()
    };
    let mut sampler = CommonSampler::new(&model, &params).unwrap();
    for _ in 0..10 {
        assert_eq!(sampler.sample(&[0.5, 0.1, 0.8, 0.3], 0).unwrap().token_id, 2);
    }
}

#[test]
fn test_top_probs_sorted_and_truncated() {
    let model = TestModel::new(&["a", "b", "c", "d"]);
    let mut sampler = CommonSampler::new(&model, &greedy_params()).unwrap();
    let result = sampler.sample(&[1.0, 3.0, 2.0, 0.0], 3).unwrap();

    let ids: Vec<u32> = result.top_probs.iter().map(|&(id, _)| id).collect();
    assert_eq!(ids, vec![1, 2, 0]);
    assert!(result.top_probs[0].1 > result.top_probs[1].1);
    assert!((result.logprob - result.top_probs[0].1.ln()).abs() < 1e-5);
}

#[test]
fn test_empty_logits_rejected() {
    let model = TestModel::new(&["a"]);
    let mut sampler = CommonSampler::new(&model, &greedy_params()).unwrap();
    assert!(sampler.sample(&[], 0).is_err());
}

#[test]
fn test_factory_rejects_empty_vocab() {
    let model = TestModel::new(&[]);
    assert!(CommonSamplerFactory.create(&model, &greedy_params()).is_err());
}

#[test]
fn test_factory_rejects_bad_grammar() {
    let model = TestModel::new(&["a", "b"]);
    let params = SamplingParams {
        grammar: "(unclosed".into(),
        ..greedy_params()
    };
    assert!(CommonSamplerFactory.create(&model, &params).is_err());
}

#[test]
fn test_grammar_masks_and_advances() {
    let model = TestModel::with_eos(&["yes", "no", "maybe", "!", "</s>"], 4);
    let params = SamplingParams {
        grammar: "(yes|no)!".into(),
        ..greedy_params()
    };
    let mut sampler = CommonSamplerFactory.create(&model, &params).unwrap();

    // "maybe" has the highest logit but is outside the grammar.
    let first = sampler.sample(&[0.1, 0.5, 9.0, 0.2, 8.0], 0).unwrap();
    assert_eq!(first.token_id, 1);
    sampler.accept(first.token_id);

    // Only "!" may follow "no".
    let second = sampler.sample(&[5.0, 5.0, 9.0, 0.1, 8.0], 0).unwrap();
    assert_eq!(second.token_id, 3);
    sampler.accept(second.token_id);

    // After a complete match only end of sequence remains.
    let third = sampler.sample(&[1.0, 1.0, 1.0, 1.0, 0.0], 0).unwrap();
    assert_eq!(third.token_id, 4);

    sampler.reset();
    assert_eq!(sampler.sample(&[0.1, 0.5, 9.0, 0.2, 8.0], 0).unwrap().token_id, 1);
}

#[test]
fn test_grammar_dead_end_without_eos() {
    let model = TestModel::with_eos(&["a", "b"], 0);
    let params = SamplingParams {
        grammar: "ab".into(),
        ..greedy_params()
    };
    let mut sampler = CommonSamplerFactory.create(&model, &params).unwrap();
    sampler.accept(0);
    sampler.accept(0);

    // "aa" has left the grammar; nothing, not even end of sequence, fits.
    assert!(sampler.sample(&[1.0, 1.0], 0).is_err());
}

#[test]
fn test_grammar_allows_eos_once_complete() {
    let model = TestModel::with_eos(&["a", "b", "c", "</s>"], 3);
    let params = SamplingParams {
        grammar: "a".into(),
        ..greedy_params()
    };
    let mut sampler = CommonSamplerFactory.create(&model, &params).unwrap();
    let logits = [0.0, 0.0, 0.0, 5.0];

    // End of sequence is masked until the grammar has matched.
    let first = sampler.sample(&logits, 0).unwrap();
    assert_eq!(first.token_id, 0);
    sampler.accept(first.token_id);

    let second = sampler.sample(&logits, 0).unwrap();
    assert_eq!(second.token_id, 3);
}
