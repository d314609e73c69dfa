//! Grammar constraints for sampling.
//!
//! A grammar string is compiled as a regular expression into a byte-level DFA,
//! then indexed against the model vocabulary so that each DFA state knows which
//! tokens may follow it. The sampler masks every other token to `-inf`.

pub mod fsm;
pub mod regex;

pub use fsm::{Grammar, TokenFsm, TokenVocab};
