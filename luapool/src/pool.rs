//! A bounded pool of Lua instances sharing one construction recipe.
//!
//! Instances are built lazily on `acquire` up to `max_size`, recycled on
//! `release` after a reset, and can be pre-built with `warmup` or discarded
//! with `drain`. Exhaustion is reported to the caller, never waited out,
//! except through the explicit `acquire_timeout`.
//!
//! Locking: one mutex guards the bookkeeping. In thread-safe mode it is taken
//! blocking and new instances are built with the lock released. In
//! single-threaded mode the lock is only ever try-locked and construction
//! happens inside the critical section.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::checkout::PooledState;
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use crate::instance::LuaInstance;

/// Bookkeeping protected by the pool mutex.
///
/// Invariant: `current_size == available.len() + checked_out <= max_size`.
struct PoolState {
    available: VecDeque<LuaInstance>,
    current_size: usize,
    checked_out: usize,
}

/// Point-in-time utilization snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub color: String,
    pub max_size: usize,
    pub current_size: usize,
    pub available: usize,
    pub checked_out: usize,
    pub thread_safe: bool,
}

impl PoolStats {
    /// At capacity with nothing idle: the next `acquire` will fail.
    pub fn is_exhausted(&self) -> bool {
        self.available == 0 && self.current_size >= self.max_size
    }
}

/// Pool of Lua instances for one color.
pub struct StatePool {
    color: String,
    config: PoolConfig,
    state: Mutex<PoolState>,
    /// Signaled whenever an instance or a construction slot frees up.
    returned: Condvar,
    thread_safe: AtomicBool,
}

impl StatePool {
    pub fn new(color: impl Into<String>, config: PoolConfig) -> Self {
        Self {
            color: color.into(),
            config,
            state: Mutex::new(PoolState {
                available: VecDeque::new(),
                current_size: 0,
                checked_out: 0,
            }),
            returned: Condvar::new(),
            thread_safe: AtomicBool::new(false),
        }
    }

    /// Enter the pool's critical section.
    fn section(&self) -> MutexGuard<'_, PoolState> {
        if self.is_thread_safe() {
            return self.lock_blocking();
        }
        match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => {
                tracing::error!(color = %self.color, "Pool mutex poisoned - recovering bookkeeping");
                poisoned.into_inner()
            }
            Err(TryLockError::WouldBlock) => {
                tracing::warn!(
                    color = %self.color,
                    "Single-threaded pool accessed concurrently - enable thread safety"
                );
                self.lock_blocking()
            }
        }
    }

    fn lock_blocking(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::error!(color = %self.color, "Pool mutex poisoned - recovering bookkeeping");
            poisoned.into_inner()
        })
    }

    /// Build one instance per the configuration: libraries, globals, hooks.
    fn build_instance(&self) -> Result<LuaInstance> {
        let instance = LuaInstance::create(self.config.libraries())?;
        self.apply_baseline(&instance)?;
        tracing::debug!(color = %self.color, instance = %instance.id(), "Constructed Lua instance");
        Ok(instance)
    }

    fn apply_baseline(&self, instance: &LuaInstance) -> Result<()> {
        for (name, value) in self.config.global_bindings() {
            instance.bind_global(name, value)?;
        }
        instance.install_hooks(self.config.hooks());
        Ok(())
    }

    /// Return an instance to its baseline: no leftover values, previous hooks
    /// removed, configured hooks and globals re-applied.
    fn reset(&self, instance: &mut LuaInstance) -> Result<()> {
        instance.clear_hooks();
        instance.reset_transient_state()?;
        self.apply_baseline(instance)
    }

    /// Check out an instance: an idle one if available, otherwise a new one
    /// while under `max_size`, otherwise [`PoolError::Exhausted`].
    pub fn acquire(&self) -> Result<LuaInstance> {
        let mut state = self.section();

        if let Some(instance) = state.available.pop_front() {
            state.checked_out += 1;
            tracing::debug!(color = %self.color, instance = %instance.id(), "Recycled Lua instance");
            return Ok(instance);
        }

        if state.current_size >= self.config.max_size() {
            tracing::debug!(color = %self.color, max_size = self.config.max_size(), "Pool exhausted");
            return Err(PoolError::exhausted(&self.color));
        }

        // Reserve the slot before building so racing acquirers see it taken.
        state.current_size += 1;
        state.checked_out += 1;

        let held = if self.is_thread_safe() {
            drop(state);
            None
        } else {
            Some(state)
        };

        match self.build_instance() {
            Ok(instance) => Ok(instance),
            Err(e) => {
                let mut state = held.unwrap_or_else(|| self.section());
                state.current_size -= 1;
                state.checked_out -= 1;
                self.returned.notify_one();
                tracing::warn!(color = %self.color, error = %e, "Failed to construct Lua instance");
                Err(e)
            }
        }
    }

    /// Like [`acquire`](Self::acquire), but when the pool is exhausted wait up
    /// to `timeout` for an instance to be released before giving up. A timeout
    /// too large to represent as a deadline waits without one.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<LuaInstance> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.acquire() {
                Err(e) if e.is_exhausted() => {}
                other => return other,
            }

            let state = self.section();
            if !state.available.is_empty() || state.current_size < self.config.max_size() {
                continue;
            }

            let Some(deadline) = deadline else {
                let _state = self
                    .returned
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                continue;
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::exhausted(&self.color));
            }

            let _state = self
                .returned
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Check out an instance wrapped in a [`PooledState`] that releases it on drop.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledState> {
        let instance = self.acquire()?;
        Ok(PooledState::new(instance, Arc::clone(self)))
    }

    /// Return an instance obtained from this pool's `acquire`.
    ///
    /// The instance is reset outside the critical section; if the reset fails
    /// it is destroyed and its slot freed instead of being recycled.
    pub fn release(&self, mut instance: LuaInstance) {
        let reset = self.reset(&mut instance);

        let mut state = self.section();
        if state.checked_out == 0 {
            tracing::warn!(
                color = %self.color,
                instance = %instance.id(),
                "Released instance was not checked out from this pool - discarding"
            );
            return;
        }
        state.checked_out -= 1;

        match reset {
            Ok(()) => {
                tracing::debug!(
                    color = %self.color,
                    instance = %instance.id(),
                    used_memory = instance.used_memory(),
                    "Released Lua instance"
                );
                state.available.push_back(instance);
            }
            Err(e) => {
                tracing::warn!(
                    color = %self.color,
                    instance = %instance.id(),
                    error = %e,
                    "Failed to reset Lua instance - destroying"
                );
                state.current_size -= 1;
            }
        }
        drop(state);
        self.returned.notify_one();
    }

    /// Eagerly build up to `n` idle instances without exceeding `max_size`.
    /// Returns how many were added.
    ///
    /// Instances already built stay in the pool if a later construction fails:
    /// the error is returned only when nothing was added, otherwise it is
    /// logged and the partial count returned.
    pub fn warmup(&self, n: usize) -> Result<usize> {
        let wanted = {
            let state = self.section();
            n.min(self.config.max_size().saturating_sub(state.current_size))
        };

        let mut added = 0;
        for _ in 0..wanted {
            let instance = match self.build_instance() {
                Ok(instance) => instance,
                Err(e) if added == 0 => return Err(e),
                Err(e) => {
                    tracing::warn!(color = %self.color, added, error = %e, "Warmup stopped early");
                    break;
                }
            };
            let mut state = self.section();
            if state.current_size >= self.config.max_size() {
                // Concurrent acquirers filled the pool while we were building.
                break;
            }
            state.current_size += 1;
            state.available.push_back(instance);
            added += 1;
            drop(state);
            self.returned.notify_one();
        }

        tracing::debug!(color = %self.color, requested = n, added, "Warmed up pool");
        Ok(added)
    }

    /// Destroy every idle instance. Checked-out instances are unaffected and
    /// may still be released normally. Returns how many were destroyed.
    pub fn drain(&self) -> usize {
        let drained = {
            let mut state = self.section();
            let drained = std::mem::take(&mut state.available);
            state.current_size -= drained.len();
            drained
        };
        let count = drained.len();
        drop(drained);

        self.returned.notify_all();
        tracing::debug!(color = %self.color, destroyed = count, "Drained pool");
        count
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn max_size(&self) -> usize {
        self.config.max_size()
    }

    pub fn current_size(&self) -> usize {
        self.section().current_size
    }

    pub fn available_count(&self) -> usize {
        self.section().available.len()
    }

    pub fn checked_out_count(&self) -> usize {
        self.section().checked_out
    }

    /// Consistent snapshot of all counters taken under one lock.
    pub fn stats(&self) -> PoolStats {
        let state = self.section();
        PoolStats {
            color: self.color.clone(),
            max_size: self.config.max_size(),
            current_size: state.current_size,
            available: state.available.len(),
            checked_out: state.checked_out,
            thread_safe: self.is_thread_safe(),
        }
    }

    pub fn set_thread_safe(&self, thread_safe: bool) {
        self.thread_safe.store(thread_safe, Ordering::Release);
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StatePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatePool")
            .field("color", &self.color)
            .field("max_size", &self.config.max_size())
            .field("thread_safe", &self.is_thread_safe())
            .finish_non_exhaustive()
    }
}
