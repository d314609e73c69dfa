//! Cactus core types, traits, and error definitions.

pub mod error;
pub mod model;
pub mod sampling;
pub mod types;

pub use error::{CactusError, Result};
pub use model::{Model, ModelConfig, ModelHandle};
pub use sampling::{SampleResult, Sampler, SamplerFactory};
pub use types::*;
