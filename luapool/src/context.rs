//! ScriptContext - snippets plus pools behind one handle.
//!
//! Convenience layer for the common embedding pattern: register snippets once,
//! then run them on an instance borrowed from a pool color.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::checkout::PooledState;
use crate::config::PoolConfig;
use crate::error::Result;
use crate::instance::LuaInstance;
use crate::pool::StatePool;
use crate::registry::{DEFAULT_POOL, PoolRegistry};
use crate::snippet::SnippetRegistry;

#[derive(Debug, Default)]
pub struct ScriptContext {
    pools: PoolRegistry,
    snippets: SnippetRegistry,
}

impl ScriptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn snippets(&self) -> &SnippetRegistry {
        &self.snippets
    }

    /// Register a snippet unless one with that name already exists.
    pub fn compile_string(&self, name: &str, code: &str) -> Result<()> {
        self.snippets.compile_string(name, code, false).map(|_| ())
    }

    /// Register a snippet, replacing any existing one.
    pub fn recompile_string(&self, name: &str, code: &str) -> Result<()> {
        self.snippets.compile_string(name, code, true).map(|_| ())
    }

    pub fn compile_file(&self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        self.snippets.compile_file(name, path, false).map(|_| ())
    }

    pub fn get_pool(&self, color: &str) -> Result<Arc<StatePool>> {
        self.pools.get_pool(color)
    }

    pub fn create_pool(&self, color: &str, config: PoolConfig) -> Result<Arc<StatePool>> {
        self.pools.create_pool(color, config)
    }

    pub fn has_pool(&self, color: &str) -> bool {
        self.pools.has_pool(color)
    }

    pub fn acquire_pooled(&self, color: &str) -> Result<LuaInstance> {
        self.pools.get_pool(color)?.acquire()
    }

    pub fn release_pooled(&self, instance: LuaInstance, color: &str) -> Result<()> {
        self.pools.get_pool(color)?.release(instance);
        Ok(())
    }

    pub fn acquire_pooled_raii(&self, color: &str) -> Result<PooledState> {
        self.pools.get_pool(color)?.checkout()
    }

    /// Run snippet `name` on an instance from `color`.
    pub fn run_pooled(&self, name: &str, color: &str) -> Result<()> {
        let snippet = self.snippets.get(name)?;
        let state = self.acquire_pooled_raii(color)?;
        state.exec_named(snippet.name(), snippet.source())
    }

    /// Run snippet `name` on the default pool.
    pub fn run_pooled_default(&self, name: &str) -> Result<()> {
        self.run_pooled(name, DEFAULT_POOL)
    }

    /// Run snippet `name` with `env` bound as globals. Returns the values of
    /// the same globals after the run. The environment is unbound again before
    /// the instance goes back to the pool.
    pub fn run_with_environment_pooled(
        &self,
        name: &str,
        env: &Map<String, Value>,
        color: &str,
    ) -> Result<Map<String, Value>> {
        let snippet = self.snippets.get(name)?;
        let state = self.acquire_pooled_raii(color)?;

        for (key, value) in env {
            state.bind_global(key, value)?;
        }

        let outcome = state
            .exec_named(snippet.name(), snippet.source())
            .and_then(|()| {
                let mut values = Map::new();
                for key in env.keys() {
                    values.insert(key.clone(), state.global_json(key)?);
                }
                Ok(values)
            });

        let baseline = state.pool().config().global_bindings();
        for key in env.keys().filter(|key| !baseline.contains_key(*key)) {
            state.bind_global(key, &Value::Null)?;
        }

        outcome
    }

    /// Evaluate ad-hoc code on an instance from `color` and return its result.
    pub fn eval_pooled(&self, code: &str, color: &str) -> Result<Value> {
        let state = self.acquire_pooled_raii(color)?;
        state.eval_json(code)
    }
}
