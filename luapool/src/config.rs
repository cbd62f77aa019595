//! Pool construction recipes.
//!
//! A [`PoolConfig`] describes how every instance of one pool is built: which
//! standard libraries to open, which globals to pre-bind, which debug hooks to
//! attach, and how many instances may exist at once. It is assembled with
//! chained builder calls, cloned into the pool, and never mutated afterwards.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mlua::{Debug as LuaDebug, DebugEvent, Lua, VmState};
use serde::{Serialize, Serializer};

pub const DEFAULT_MAX_SIZE: usize = 5;

/// Debug hook callback shared by every instance of a pool.
pub type HookFn = Arc<dyn Fn(&Lua, &LuaDebug<'_>) -> mlua::Result<VmState> + Send + Sync>;

/// Which interpreter events fire a hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    Call,
    Return,
    Line,
    Count,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Return => "return",
            Self::Line => "line",
            Self::Count => "count",
        }
    }

    /// Tail calls are reported as calls.
    pub(crate) fn matches(&self, event: &DebugEvent) -> bool {
        matches!(
            (self, event),
            (Self::Call, DebugEvent::Call | DebugEvent::TailCall)
                | (Self::Return, DebugEvent::Ret)
                | (Self::Line, DebugEvent::Line)
                | (Self::Count, DebugEvent::Count)
        )
    }
}

impl std::str::FromStr for HookKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "call" => Ok(Self::Call),
            "return" => Ok(Self::Return),
            "line" => Ok(Self::Line),
            "count" => Ok(Self::Count),
            other => Err(format!("unknown hook kind '{other}'")),
        }
    }
}

/// One configured hook: event kind, instruction count (only meaningful for
/// [`HookKind::Count`]) and callback.
#[derive(Clone)]
pub struct HookSpec {
    pub kind: HookKind,
    pub trigger_count: u32,
    pub callback: HookFn,
}

impl HookSpec {
    pub fn new<F>(kind: HookKind, trigger_count: u32, callback: F) -> Self
    where
        F: Fn(&Lua, &LuaDebug<'_>) -> mlua::Result<VmState> + Send + Sync + 'static,
    {
        Self {
            kind,
            trigger_count,
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSpec")
            .field("kind", &self.kind)
            .field("trigger_count", &self.trigger_count)
            .finish_non_exhaustive()
    }
}

/// Construction recipe for the instances of one pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolConfig {
    libraries: BTreeSet<String>,
    global_bindings: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    hooks: Vec<HookSpec>,
    max_size: usize,
    #[serde(rename = "exhaustion_timeout_ms", serialize_with = "serialize_millis")]
    exhaustion_timeout: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            libraries: BTreeSet::new(),
            global_bindings: BTreeMap::new(),
            hooks: Vec::new(),
            max_size: DEFAULT_MAX_SIZE,
            exhaustion_timeout: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the library subset. An empty set loads every library.
    pub fn with_libraries<I, S>(mut self, libraries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.libraries = libraries.into_iter().map(Into::into).collect();
        self
    }

    /// Bind `value` to the global `name` in every instance. Re-binding a name
    /// replaces the earlier value.
    pub fn with_global(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.global_bindings.insert(name.into(), value);
        self
    }

    pub fn with_hook<F>(mut self, kind: HookKind, trigger_count: u32, callback: F) -> Self
    where
        F: Fn(&Lua, &LuaDebug<'_>) -> mlua::Result<VmState> + Send + Sync + 'static,
    {
        self.hooks.push(HookSpec::new(kind, trigger_count, callback));
        self
    }

    /// Set the instance cap. Zero is clamped to one.
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn with_exhaustion_timeout(mut self, timeout: Duration) -> Self {
        self.exhaustion_timeout = timeout;
        self
    }

    pub fn libraries(&self) -> &BTreeSet<String> {
        &self.libraries
    }

    /// True when the configuration loads every library.
    pub fn loads_all_libraries(&self) -> bool {
        self.libraries.is_empty()
    }

    pub fn global_bindings(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.global_bindings
    }

    pub fn hooks(&self) -> &[HookSpec] {
        &self.hooks
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn exhaustion_timeout(&self) -> Duration {
        self.exhaustion_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PoolConfig::new();
        assert!(config.loads_all_libraries());
        assert!(config.global_bindings().is_empty());
        assert!(config.hooks().is_empty());
        assert_eq!(config.max_size(), DEFAULT_MAX_SIZE);
        assert_eq!(config.exhaustion_timeout(), Duration::ZERO);
    }

    #[test]
    fn builder_chains() {
        let config = PoolConfig::new()
            .with_libraries(["base", "math"])
            .with_global("answer", serde_json::json!(42))
            .with_global("answer", serde_json::json!(43))
            .with_hook(HookKind::Count, 1000, |_, _| Ok(VmState::Continue))
            .with_max_size(3)
            .with_exhaustion_timeout(Duration::from_millis(250));

        assert!(!config.loads_all_libraries());
        assert!(config.libraries().contains("math"));
        assert_eq!(config.global_bindings()["answer"], serde_json::json!(43));
        assert_eq!(config.hooks().len(), 1);
        assert_eq!(config.hooks()[0].kind, HookKind::Count);
        assert_eq!(config.hooks()[0].trigger_count, 1000);
        assert_eq!(config.max_size(), 3);
        assert_eq!(config.exhaustion_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn zero_max_size_is_clamped() {
        assert_eq!(PoolConfig::new().with_max_size(0).max_size(), 1);
    }

    #[test]
    fn hook_kind_parses() {
        assert_eq!("line".parse::<HookKind>(), Ok(HookKind::Line));
        assert!("tick".parse::<HookKind>().is_err());
    }

    #[test]
    fn hook_kind_names_round_trip() {
        for kind in [HookKind::Call, HookKind::Return, HookKind::Line, HookKind::Count] {
            assert_eq!(kind.as_str().parse::<HookKind>(), Ok(kind));
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::json!(kind.as_str())
            );
        }
    }

    #[test]
    fn hook_kind_matches_events() {
        assert!(HookKind::Call.matches(&DebugEvent::Call));
        assert!(HookKind::Call.matches(&DebugEvent::TailCall));
        assert!(HookKind::Return.matches(&DebugEvent::Ret));
        assert!(!HookKind::Line.matches(&DebugEvent::Count));
    }

    #[test]
    fn config_serializes_without_hooks() {
        let config = PoolConfig::new()
            .with_libraries(["string", "base", "table"])
            .with_global("mode", serde_json::json!("strict"))
            .with_hook(HookKind::Line, 0, |_, _| Ok(VmState::Continue))
            .with_max_size(2)
            .with_exhaustion_timeout(Duration::from_millis(1500));
        insta::assert_json_snapshot!("pool_config_serialized", config);
    }
}
