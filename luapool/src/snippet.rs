//! Named Lua snippets, syntax-checked once and run many times.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use mlua::{Lua, LuaOptions, StdLib};

use crate::error::{PoolError, Result};

/// A compiled-and-validated piece of Lua source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    name: String,
    source: Arc<str>,
}

impl Snippet {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Snippets by name.
#[derive(Debug, Default)]
pub struct SnippetRegistry {
    snippets: RwLock<HashMap<String, Snippet>>,
}

impl SnippetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that `code` compiles without running it.
    fn validate(name: &str, code: &str) -> Result<()> {
        let compile_error = |e: mlua::Error| PoolError::Compile {
            name: name.to_string(),
            message: e.to_string(),
        };
        let lua = Lua::new_with(StdLib::NONE, LuaOptions::default())?;
        lua.load(code)
            .set_name(name)
            .into_function()
            .map_err(compile_error)?;
        Ok(())
    }

    /// Compile `code` and store it under `name`. An existing snippet is kept
    /// unless `recompile` is set. Returns whether the registry changed.
    pub fn compile_string(&self, name: &str, code: &str, recompile: bool) -> Result<bool> {
        if !recompile && self.exists(name) {
            return Ok(false);
        }

        Self::validate(name, code)?;

        let snippet = Snippet {
            name: name.to_string(),
            source: Arc::from(code),
        };
        self.snippets
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), snippet);
        tracing::debug!(snippet = name, bytes = code.len(), "Compiled snippet");
        Ok(true)
    }

    /// Read a file and register its contents as `name`.
    pub fn compile_file(&self, name: &str, path: impl AsRef<Path>, recompile: bool) -> Result<bool> {
        if !recompile && self.exists(name) {
            return Ok(false);
        }
        let code = std::fs::read_to_string(path.as_ref())?;
        self.compile_string(name, &code, recompile)
    }

    pub fn get(&self, name: &str) -> Result<Snippet> {
        self.snippets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| PoolError::SnippetNotFound(name.to_string()))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.snippets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snippets
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
