//! Regex grammars compiled with `regex-automata`.

use std::collections::HashMap;

use regex_automata::Anchored;
use regex_automata::dfa::{Automaton, StartKind, dense};
use regex_automata::util::primitives::StateID;
use regex_automata::util::start;

use cactus_core::{CactusError, Result};

use super::fsm::{CharDfa, Grammar, TokenFsm, TokenVocab};

const MAX_PATTERN_LEN: usize = 8192;
/// 10 MB
const MAX_DFA_SIZE: usize = 10 * 1024 * 1024;

/// Byte DFA accepting exactly the strings a regex matches in full, with states
/// renumbered densely from zero.
pub struct RegexDfa {
    dfa: dense::DFA<Vec<u32>>,
    states: Vec<StateID>,
    index: HashMap<StateID, u32>,
    initial: u32,
}

impl RegexDfa {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(CactusError::Grammar(format!(
                "pattern too long ({} bytes, max {MAX_PATTERN_LEN})",
                pattern.len()
            )));
        }

        let dfa = dense::Builder::new()
            .configure(
                dense::DFA::config()
                    .start_kind(StartKind::Anchored)
                    .dfa_size_limit(Some(MAX_DFA_SIZE)),
            )
            .build(&format!("(?:{pattern})$"))
            .map_err(|e| CactusError::Grammar(format!("cannot compile {pattern:?}: {e}")))?;

        let start_id = dfa
            .start_state(&start::Config::new().anchored(Anchored::Yes))
            .map_err(|e| CactusError::Grammar(format!("no start state: {e}")))?;

        // Depth-first walk over every byte transition reachable from the start.
        let mut states = Vec::new();
        let mut index = HashMap::new();
        let mut stack = vec![start_id];
        index.insert(start_id, 0u32);
        states.push(start_id);

        while let Some(sid) = stack.pop() {
            for byte in 0..=255u8 {
                let next = dfa.next_state(sid, byte);
                if dfa.is_dead_state(next) || index.contains_key(&next) {
                    continue;
                }
                index.insert(next, states.len() as u32);
                states.push(next);
                stack.push(next);
            }
        }

        Ok(Self {
            dfa,
            states,
            index,
            initial: 0,
        })
    }
}

impl CharDfa for RegexDfa {
    fn initial_state(&self) -> u32 {
        self.initial
    }

    fn next_state(&self, state: u32, byte: u8) -> Option<u32> {
        let sid = *self.states.get(state as usize)?;
        let next = self.dfa.next_state(sid, byte);
        if self.dfa.is_dead_state(next) {
            return None;
        }
        self.index.get(&next).copied()
    }

    /// Matches are reported one transition late, so a state accepts when it
    /// is a match state or reaches one on end-of-input.
    fn is_final_state(&self, state: u32) -> bool {
        let Some(&sid) = self.states.get(state as usize) else {
            return false;
        };
        self.dfa.is_match_state(sid) || self.dfa.is_match_state(self.dfa.next_eoi_state(sid))
    }

    fn all_states(&self) -> Vec<u32> {
        (0..self.states.len() as u32).collect()
    }
}

/// Compile `pattern` against `vocab` into a ready-to-use grammar.
pub fn compile_grammar(pattern: &str, vocab: &TokenVocab) -> Result<Grammar> {
    let dfa = RegexDfa::new(pattern)?;
    Ok(Grammar::new(TokenFsm::build(&dfa, vocab)))
}
