//! Version information for luapool.

use mlua::{Lua, LuaOptions, StdLib};

/// Luapool version from Cargo.toml
pub const LUAPOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Version information for the runtime.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionInfo {
    /// Luapool crate version.
    pub luapool: &'static str,
    /// Embedded Lua version (e.g. "Lua 5.4").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lua: Option<String>,
}

impl Default for VersionInfo {
    fn default() -> Self {
        Self {
            luapool: LUAPOOL_VERSION,
            lua: None,
        }
    }
}

impl VersionInfo {
    /// Create version info with luapool version only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Lua version.
    pub fn with_lua(mut self, version: String) -> Self {
        self.lua = Some(version);
        self
    }

    /// Probe the embedded interpreter for its `_VERSION` string.
    pub fn detect() -> Self {
        let probe = Lua::new_with(StdLib::NONE, LuaOptions::default())
            .and_then(|lua| lua.globals().get::<String>("_VERSION"));
        match probe {
            Ok(version) => Self::new().with_lua(version),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to detect Lua version");
                Self::new()
            }
        }
    }
}
