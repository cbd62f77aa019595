//! Error types for pool, registry and script operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    /// No idle instance and the pool is already at `max_size`.
    #[error("pool '{color}' exhausted: no available states and maximum size reached")]
    Exhausted { color: String },

    #[error("pool '{0}' not found")]
    NotFound(String),

    #[error("pool '{0}' already exists")]
    AlreadyExists(String),

    #[error("cannot destroy predefined pool '{0}'")]
    ProtectedPool(String),

    #[error("unknown Lua library '{0}'")]
    UnknownLibrary(String),

    #[error("failed to compile snippet '{name}': {message}")]
    Compile { name: String, message: String },

    #[error("snippet '{0}' not found")]
    SnippetNotFound(String),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Exhaustion is back-pressure, not a bug; callers may retry or fall back to another color.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::Exhausted { .. })
    }

    pub(crate) fn exhausted(color: &str) -> Self {
        PoolError::Exhausted {
            color: color.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_names_the_color() {
        let err = PoolError::exhausted("tiny");
        assert!(err.is_exhausted());
        assert_eq!(
            err.to_string(),
            "pool 'tiny' exhausted: no available states and maximum size reached"
        );
    }

    #[test]
    fn other_errors_are_not_exhaustion() {
        assert!(!PoolError::NotFound("x".into()).is_exhausted());
        assert!(!PoolError::ProtectedPool("default".into()).is_exhausted());
        assert_eq!(
            PoolError::ProtectedPool("io".into()).to_string(),
            "cannot destroy predefined pool 'io'"
        );
    }

    #[test]
    fn lua_errors_convert() {
        let err: PoolError = mlua::Error::runtime("boom").into();
        assert!(matches!(err, PoolError::Lua(_)));
        assert!(err.to_string().contains("boom"));
    }
}
