//! Token-level automaton built on top of a byte DFA.

use std::collections::{HashMap, HashSet};

use cactus_core::Model;

/// Vocabulary of a model as token id → text. Built once per sampler.
pub struct TokenVocab {
    pub id_to_token: Vec<String>,
}

impl TokenVocab {
    pub fn from_model(model: &dyn Model) -> Self {
        let vocab_size = model.config().vocab_size;
        let id_to_token = (0..vocab_size as u32)
            .map(|id| model.token_text(id).unwrap_or_default())
            .collect();
        Self { id_to_token }
    }

    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Self {
        Self {
            id_to_token: tokens.iter().map(|t| t.as_ref().to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }
}

/// Byte-level DFA as seen by the token indexer.
pub trait CharDfa {
    fn initial_state(&self) -> u32;
    fn next_state(&self, state: u32, byte: u8) -> Option<u32>;
    fn is_final_state(&self, state: u32) -> bool;
    fn all_states(&self) -> Vec<u32>;
}

/// Precomputed mapping of DFA states to the tokens allowed from them.
pub struct TokenFsm {
    allowed: HashMap<u32, Vec<u32>>,
    transitions: HashMap<(u32, u32), u32>,
    final_states: HashSet<u32>,
    initial_state: u32,
}

impl TokenFsm {
    /// Walk every vocabulary entry from every DFA state. A token is allowed from
    /// a state if all of its bytes stay inside the DFA; its end state becomes the
    /// transition target. Empty tokens are never allowed.
    pub fn build(dfa: &dyn CharDfa, vocab: &TokenVocab) -> Self {
        let mut allowed: HashMap<u32, Vec<u32>> = HashMap::new();
        let mut transitions = HashMap::new();
        let mut final_states = HashSet::new();

        for state in dfa.all_states() {
            if dfa.is_final_state(state) {
                final_states.insert(state);
            }
            let entry = allowed.entry(state).or_default();
            for (token_id, text) in vocab.id_to_token.iter().enumerate() {
                if text.is_empty() {
                    continue;
                }
                let end = text
                    .bytes()
                    .try_fold(state, |current, byte| dfa.next_state(current, byte));
                if let Some(end) = end {
                    entry.push(token_id as u32);
                    transitions.insert((state, token_id as u32), end);
                }
            }
        }

        Self {
            allowed,
            transitions,
            final_states,
            initial_state: dfa.initial_state(),
        }
    }

    pub fn initial_state(&self) -> u32 {
        self.initial_state
    }

    pub fn allowed_tokens(&self, state: u32) -> &[u32] {
        self.allowed.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn next_state(&self, state: u32, token_id: u32) -> Option<u32> {
        self.transitions.get(&(state, token_id)).copied()
    }

    pub fn is_final_state(&self, state: u32) -> bool {
        self.final_states.contains(&state)
    }
}

/// A token automaton plus the position reached by the tokens accepted so far.
pub struct Grammar {
    fsm: TokenFsm,
    state: Option<u32>,
}

impl Grammar {
    pub fn new(fsm: TokenFsm) -> Self {
        let state = Some(fsm.initial_state());
        Self { fsm, state }
    }

    /// Set every logit whose token may not follow the current state to `-inf`.
    /// Once the grammar has been left, nothing is allowed.
    pub fn mask_logits(&self, logits: &mut [f32]) {
        let mut mask = vec![false; logits.len()];
        if let Some(state) = self.state {
            for &id in self.fsm.allowed_tokens(state) {
                if let Some(slot) = mask.get_mut(id as usize) {
                    *slot = true;
                }
            }
        }
        for (logit, keep) in logits.iter_mut().zip(mask) {
            if !keep {
                *logit = f32::NEG_INFINITY;
            }
        }
    }

    pub fn accept(&mut self, token_id: u32) {
        self.state = self
            .state
            .and_then(|state| self.fsm.next_state(state, token_id));
    }

    pub fn reset(&mut self) {
        self.state = Some(self.fsm.initial_state());
    }

    /// True when the accepted tokens form a complete match.
    pub fn is_complete(&self) -> bool {
        self.state.is_some_and(|s| self.fsm.is_final_state(s))
    }

    /// False once a token outside the grammar has been accepted.
    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }
}
