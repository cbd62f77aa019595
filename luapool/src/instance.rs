//! Lua runtime instances handed out by pools.
//!
//! This is the thin adapter over `mlua` that the pool builds on. An instance
//! owns one Lua state plus a host-side value stack used to pass arguments into
//! and results out of script calls.

use std::collections::BTreeSet;

use mlua::{
    HookTriggers, Lua, LuaOptions, LuaSerdeExt, MultiValue, SerializeOptions, StdLib, Value,
    VmState,
};

use crate::config::{HookKind, HookSpec};
use crate::error::{PoolError, Result};

/// Unique identifier for an instance, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(uuid::Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map a library name to its `mlua` flag. `base` is always opened by the
/// runtime and maps to the empty set.
pub fn std_lib_for(name: &str) -> Result<StdLib> {
    let lib = match name {
        "base" => StdLib::NONE,
        "coroutine" => StdLib::COROUTINE,
        "debug" => StdLib::DEBUG,
        "io" => StdLib::IO,
        "math" => StdLib::MATH,
        "os" => StdLib::OS,
        "package" => StdLib::PACKAGE,
        "string" => StdLib::STRING,
        "table" => StdLib::TABLE,
        "utf8" => StdLib::UTF8,
        other => return Err(PoolError::UnknownLibrary(other.to_string())),
    };
    Ok(lib)
}

fn resolve_libraries(names: &BTreeSet<String>) -> Result<StdLib> {
    if names.is_empty() {
        return Ok(StdLib::ALL);
    }
    names
        .iter()
        .try_fold(StdLib::NONE, |acc, name| Ok(acc | std_lib_for(name)?))
}

fn binding_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
        .set_array_metatable(false)
}

/// One Lua state. Not safe for concurrent use; pools hand each instance to
/// exactly one caller at a time.
pub struct LuaInstance {
    id: InstanceId,
    lua: Lua,
    stack: Vec<Value>,
}

impl LuaInstance {
    /// Create a state with the given library subset opened (empty = all).
    pub fn create(libraries: &BTreeSet<String>) -> Result<Self> {
        let libs = resolve_libraries(libraries)?;
        let lua = if libs.contains(StdLib::DEBUG) {
            // SAFETY: the debug library can break memory safety guarantees of
            // Lua code; callers opt in by naming it (or loading everything).
            unsafe { Lua::unsafe_new_with(libs, LuaOptions::default()) }
        } else {
            let lua = Lua::new_with(StdLib::NONE, LuaOptions::default())?;
            lua.load_std_libs(libs)?;
            lua
        };

        Ok(Self {
            id: InstanceId::new(),
            lua,
            stack: Vec::new(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Install `value` under the global `name`, replacing any previous binding.
    pub fn bind_global(&self, name: &str, value: &serde_json::Value) -> Result<()> {
        let value = self.lua.to_value_with(value, binding_options())?;
        self.lua.globals().set(name, value)?;
        Ok(())
    }

    /// Attach the configured hooks.
    ///
    /// Lua keeps a single hook per state, so the specs are merged: the trigger
    /// mask is the union of all kinds and each event is dispatched to the specs
    /// whose kind matches. The first non-continue result wins.
    pub fn install_hooks(&self, hooks: &[HookSpec]) {
        if hooks.is_empty() {
            return;
        }

        let mut triggers = HookTriggers::default();
        for hook in hooks {
            match hook.kind {
                HookKind::Call => triggers.on_calls = true,
                HookKind::Return => triggers.on_returns = true,
                HookKind::Line => triggers.every_line = true,
                HookKind::Count => {
                    let count = hook.trigger_count.max(1);
                    triggers.every_nth_instruction = Some(
                        triggers
                            .every_nth_instruction
                            .map_or(count, |current| current.min(count)),
                    );
                }
            }
        }

        let kinds: Vec<&str> = hooks.iter().map(|h| h.kind.as_str()).collect();
        tracing::trace!(instance = %self.id, hooks = ?kinds, "Installing hooks");

        let hooks = hooks.to_vec();
        self.lua.set_hook(triggers, move |lua, debug| {
            let event = debug.event();
            for hook in hooks.iter().filter(|h| h.kind.matches(&event)) {
                let state = (hook.callback)(lua, &debug)?;
                if !matches!(state, VmState::Continue) {
                    return Ok(state);
                }
            }
            Ok(VmState::Continue)
        });
    }

    pub fn clear_hooks(&self) {
        self.lua.remove_hook();
    }

    /// Drop everything a previous user left behind without touching loaded
    /// libraries or globals: the value stack, expired registry slots and
    /// unreachable garbage.
    pub fn reset_transient_state(&mut self) -> Result<()> {
        self.stack.clear();
        self.lua.expire_registry_values();
        self.lua.gc_collect()?;
        Ok(())
    }

    /// Run a chunk for its side effects.
    pub fn exec(&self, code: &str) -> Result<()> {
        self.lua.load(code).exec()?;
        Ok(())
    }

    /// Run a named chunk for its side effects; the name shows up in Lua errors.
    pub fn exec_named(&self, name: &str, code: &str) -> Result<()> {
        self.lua.load(code).set_name(name).exec()?;
        Ok(())
    }

    /// Evaluate an expression or chunk and convert its first result to JSON.
    pub fn eval_json(&self, code: &str) -> Result<serde_json::Value> {
        let value: Value = self.lua.load(code).eval()?;
        self.to_json(value)
    }

    /// Read a global as JSON (`nil` becomes `null`).
    pub fn global_json(&self, name: &str) -> Result<serde_json::Value> {
        let value: Value = self.lua.globals().get(name)?;
        self.to_json(value)
    }

    fn to_json(&self, value: Value) -> Result<serde_json::Value> {
        if value.is_nil() {
            return Ok(serde_json::Value::Null);
        }
        Ok(self.lua.from_value(value)?)
    }

    /// Push a host value onto the instance's value stack.
    pub fn push(&mut self, value: &serde_json::Value) -> Result<()> {
        let value = self.lua.to_value_with(value, binding_options())?;
        self.stack.push(value);
        Ok(())
    }

    /// Pop the top of the value stack as JSON.
    pub fn pop(&mut self) -> Result<Option<serde_json::Value>> {
        match self.stack.pop() {
            Some(value) => self.to_json(value).map(Some),
            None => Ok(None),
        }
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Call the global function `name` with the whole value stack as
    /// arguments; its results replace the stack. Returns the result count.
    pub fn call_global(&mut self, name: &str) -> Result<usize> {
        let function: mlua::Function = self.lua.globals().get(name)?;
        let args: MultiValue = self.stack.drain(..).collect();
        let results: MultiValue = function.call(args)?;
        self.stack.extend(results);
        Ok(self.stack.len())
    }

    /// Bytes currently allocated by the Lua state.
    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }
}

impl std::fmt::Debug for LuaInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaInstance")
            .field("id", &self.id)
            .field("stack_len", &self.stack.len())
            .finish_non_exhaustive()
    }
}
