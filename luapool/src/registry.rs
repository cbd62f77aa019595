//! PoolRegistry - named pools with protected built-ins.
//!
//! The registry owns every pool by color. Four built-in colors are created up
//! front and can never be destroyed. The registry-wide thread-safety flag is
//! pushed to every pool it owns and inherited by pools created later.
//!
//! Lock order: registry mutex before any pool mutex, never the reverse. Pools
//! are handed out as `Arc`s so callers run pool operations after the registry
//! lock is gone.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::pool::{PoolStats, StatePool};

pub const DEFAULT_POOL: &str = "default";
pub const SANDBOXED_POOL: &str = "sandboxed";
pub const MINIMAL_POOL: &str = "minimal";
pub const IO_POOL: &str = "io";

/// Colors that exist in every registry and cannot be destroyed.
pub const PROTECTED_POOLS: [&str; 4] = [DEFAULT_POOL, SANDBOXED_POOL, MINIMAL_POOL, IO_POOL];

/// Construction recipe for a built-in color.
fn builtin_config(color: &str) -> PoolConfig {
    let config = PoolConfig::new();
    match color {
        SANDBOXED_POOL => config.with_libraries(["base", "math", "string", "table"]),
        MINIMAL_POOL => config.with_libraries(["base"]),
        IO_POOL => config.with_libraries(["base", "io", "os"]),
        _ => config,
    }
}

struct RegistryState {
    pools: BTreeMap<String, Arc<StatePool>>,
    thread_safe: bool,
}

/// Owner of all named pools.
///
/// Construct one explicitly and pass it to whatever needs pools; registries
/// are independent of each other.
pub struct PoolRegistry {
    state: Mutex<RegistryState>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        let pools = PROTECTED_POOLS
            .iter()
            .map(|color| {
                let pool = StatePool::new(*color, builtin_config(color));
                (color.to_string(), Arc::new(pool))
            })
            .collect();

        Self {
            state: Mutex::new(RegistryState {
                pools,
                thread_safe: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Registry mutex poisoned - recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_protected(color: &str) -> bool {
        PROTECTED_POOLS.contains(&color)
    }

    pub fn get_pool(&self, color: &str) -> Result<Arc<StatePool>> {
        self.lock()
            .pools
            .get(color)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(color.to_string()))
    }

    /// Create and register a new pool. It inherits the registry's current
    /// thread-safety flag.
    pub fn create_pool(&self, color: &str, config: PoolConfig) -> Result<Arc<StatePool>> {
        let mut state = self.lock();
        if state.pools.contains_key(color) {
            return Err(PoolError::AlreadyExists(color.to_string()));
        }

        let pool = Arc::new(StatePool::new(color, config));
        pool.set_thread_safe(state.thread_safe);
        state.pools.insert(color.to_string(), Arc::clone(&pool));

        tracing::info!(color, max_size = pool.max_size(), "Created pool");
        Ok(pool)
    }

    /// Remove a non-protected pool. Its idle instances are destroyed once the
    /// last outstanding checkout referencing it is gone.
    pub fn destroy_pool(&self, color: &str) -> Result<()> {
        let removed = {
            let mut state = self.lock();
            if !state.pools.contains_key(color) {
                return Err(PoolError::NotFound(color.to_string()));
            }
            if Self::is_protected(color) {
                return Err(PoolError::ProtectedPool(color.to_string()));
            }
            state.pools.remove(color)
        };

        if let Some(pool) = removed {
            let outstanding = pool.checked_out_count();
            if outstanding > 0 {
                tracing::warn!(color, outstanding, "Destroyed pool with instances still checked out");
            }
            pool.drain();
        }
        tracing::info!(color, "Destroyed pool");
        Ok(())
    }

    pub fn has_pool(&self, color: &str) -> bool {
        self.lock().pools.contains_key(color)
    }

    /// Registered colors, sorted.
    pub fn list_pools(&self) -> Vec<String> {
        self.lock().pools.keys().cloned().collect()
    }

    /// Store the flag and push it to every pool owned right now.
    pub fn set_thread_safe(&self, thread_safe: bool) {
        let mut state = self.lock();
        state.thread_safe = thread_safe;
        for pool in state.pools.values() {
            pool.set_thread_safe(thread_safe);
        }
        tracing::debug!(thread_safe, pools = state.pools.len(), "Updated registry thread safety");
    }

    pub fn is_thread_safe(&self) -> bool {
        self.lock().thread_safe
    }

    /// Stats for every pool, in color order.
    pub fn stats(&self) -> Vec<PoolStats> {
        let pools: Vec<Arc<StatePool>> = self.lock().pools.values().cloned().collect();
        pools.iter().map(|pool| pool.stats()).collect()
    }
}

impl Default for PoolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.list_pools())
            .field("thread_safe", &self.is_thread_safe())
            .finish()
    }
}
