use thiserror::Error;

use luapool::PoolError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error("invalid value '{value}' for {flag}: expected a positive integer")]
    InvalidNumber { flag: &'static str, value: String },

    #[error("script not found: {0}")]
    ScriptNotFound(String),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CliError {
    /// Usage problems exit with 2, everything else with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) | CliError::InvalidNumber { .. } => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CliError>;
