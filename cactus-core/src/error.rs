use thiserror::Error;

#[derive(Error, Debug)]
pub enum CactusError {
    #[error("Model is not loaded")]
    ModelNotLoaded,

    #[error("Sampling context is not initialized")]
    SamplerNotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Grammar error: {0}")]
    Grammar(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CactusError>;
