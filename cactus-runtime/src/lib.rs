//! Cactus runtime: generation sessions, sampling, and grammar constraints.

pub mod constraints;
pub mod sampling;
pub mod session;

pub use sampling::{CommonSampler, CommonSamplerFactory};
pub use session::{GenerationState, InterruptHandle, Session, StopKind};
