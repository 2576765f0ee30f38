//! Error types for cirun.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("script generation failed: {0}")]
    ScriptGeneration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("executor used before prepare")]
    NotPrepared,

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
