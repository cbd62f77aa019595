//! luapool: bounded, named pools of reusable Lua runtime instances.

mod checkout;
mod config;
mod context;
mod error;
mod instance;
mod pool;
mod registry;
mod snippet;
mod version;

pub use checkout::PooledState;
pub use config::{DEFAULT_MAX_SIZE, HookFn, HookKind, HookSpec, PoolConfig};
pub use context::ScriptContext;
pub use error::{PoolError, Result};
pub use instance::{InstanceId, LuaInstance, std_lib_for};
pub use pool::{PoolStats, StatePool};
pub use registry::{
    DEFAULT_POOL, IO_POOL, MINIMAL_POOL, PROTECTED_POOLS, PoolRegistry, SANDBOXED_POOL,
};
pub use snippet::{Snippet, SnippetRegistry};
pub use version::{LUAPOOL_VERSION, VersionInfo};

pub use mlua;
