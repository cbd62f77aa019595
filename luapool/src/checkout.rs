//! PooledState - RAII checkout of one instance.
//!
//! The handle owns the instance and a reference to the pool that issued it.
//! The instance goes back to the pool exactly once: on explicit `release()`
//! or when the handle is dropped, whichever comes first. Moving the handle
//! moves that responsibility with it.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::instance::LuaInstance;
use crate::pool::StatePool;

/// Checked-out instance that returns to its pool on drop.
#[must_use = "dropping a PooledState immediately returns the instance to its pool"]
pub struct PooledState {
    instance: Option<LuaInstance>,
    pool: Arc<StatePool>,
}

impl PooledState {
    pub fn new(instance: LuaInstance, pool: Arc<StatePool>) -> Self {
        Self {
            instance: Some(instance),
            pool,
        }
    }

    /// The wrapped instance, or `None` once released.
    pub fn get(&self) -> Option<&LuaInstance> {
        self.instance.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut LuaInstance> {
        self.instance.as_mut()
    }

    /// Whether the handle still owns an instance.
    pub fn is_held(&self) -> bool {
        self.instance.is_some()
    }

    pub fn pool(&self) -> &Arc<StatePool> {
        &self.pool
    }

    /// Return the instance to its pool now. Idempotent.
    pub fn release(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.release(instance);
        }
    }

    /// Detach the instance from the handle. The caller becomes responsible
    /// for handing it back with [`StatePool::release`].
    pub fn into_inner(mut self) -> Option<LuaInstance> {
        self.instance.take()
    }
}

impl Deref for PooledState {
    type Target = LuaInstance;

    /// Panics if the handle was already released.
    fn deref(&self) -> &Self::Target {
        self.instance
            .as_ref()
            .expect("PooledState dereferenced after release")
    }
}

impl DerefMut for PooledState {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.instance
            .as_mut()
            .expect("PooledState dereferenced after release")
    }
}

impl Drop for PooledState {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PooledState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledState")
            .field("pool", &self.pool.color())
            .field("instance", &self.instance.as_ref().map(LuaInstance::id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn pool() -> Arc<StatePool> {
        Arc::new(StatePool::new(
            "raii",
            PoolConfig::new().with_libraries(["base"]).with_max_size(2),
        ))
    }

    #[test]
    fn drop_returns_instance() {
        let pool = pool();
        {
            let state = pool.checkout().unwrap();
            assert!(state.is_held());
            assert_eq!(pool.checked_out_count(), 1);
            assert_eq!(pool.available_count(), 0);
        }
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn explicit_release_is_idempotent() {
        let pool = pool();
        let mut state = pool.checkout().unwrap();
        state.release();
        assert!(!state.is_held());
        assert!(state.get().is_none());
        assert_eq!(pool.available_count(), 1);

        state.release();
        drop(state);
        assert_eq!(pool.available_count(), 1);
        assert_eq!(pool.checked_out_count(), 0);
    }

    #[test]
    fn move_transfers_release_responsibility() {
        let pool = pool();
        let first = pool.checkout().unwrap();
        let id = first.id();

        let moved = first;
        assert_eq!(pool.checked_out_count(), 1);
        assert_eq!(moved.id(), id);

        drop(moved);
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.available_count(), 1);
    }

    #[test]
    fn reassignment_releases_previous_instance() {
        let pool = pool();
        let mut slot = pool.checkout().unwrap();
        let other = pool.checkout().unwrap();
        assert!(slot.is_held());
        assert_eq!(pool.checked_out_count(), 2);

        slot = other;
        assert_eq!(pool.checked_out_count(), 1);
        assert_eq!(pool.available_count(), 1);
        assert!(slot.is_held());

        drop(slot);
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.available_count(), 2);
    }

    #[test]
    fn deref_exposes_instance() {
        let pool = pool();
        let mut state = pool.checkout().unwrap();
        state.exec("value = 21 * 2").unwrap();
        assert_eq!(state.global_json("value").unwrap(), serde_json::json!(42));

        state.push(&serde_json::json!(1)).unwrap();
        assert_eq!(state.get_mut().map(|i| i.stack_len()), Some(1));
    }

    #[test]
    fn into_inner_detaches() {
        let pool = pool();
        let state = pool.checkout().unwrap();
        let instance = state.into_inner().unwrap();
        assert_eq!(pool.checked_out_count(), 1);

        pool.release(instance);
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.available_count(), 1);
    }
}
