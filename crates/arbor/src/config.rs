//! Process-level defaults that each thread's [`Context`](crate::context::Context) is seeded from.
//!
//! Defaults can come from code ([`Config::default`] and the `with_*` builders),
//! or from the environment:
//!
//! | variable                  | values                               |
//! |---------------------------|--------------------------------------|
//! | `ARBOR_WRAPPED_MODE`      | `1`/`true`/`yes`/`on` or the reverse |
//! | `ARBOR_AUTO_WRAPPED_MODE` | as above                             |
//! | `ARBOR_DEBUG_MODE`        | `off`, `exception`, `breakpoint`     |
//! | `ARBOR_TRACE_MODE`        | `full`, `summary`                    |
//! | `ARBOR_DEFAULT_BACKEND`   | a registered backend name            |
//!
//! [`install`] replaces the process defaults; it only affects threads whose
//! context has not been created yet.

use std::sync::{OnceLock, PoisonError, RwLock};

use crate::context::{DebugMode, TraceMode};
use crate::error::{Error, Result};

pub const ENV_WRAPPED_MODE: &str = "ARBOR_WRAPPED_MODE";
pub const ENV_AUTO_WRAPPED_MODE: &str = "ARBOR_AUTO_WRAPPED_MODE";
pub const ENV_DEBUG_MODE: &str = "ARBOR_DEBUG_MODE";
pub const ENV_TRACE_MODE: &str = "ARBOR_TRACE_MODE";
pub const ENV_DEFAULT_BACKEND: &str = "ARBOR_DEFAULT_BACKEND";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Whether dispatched results come back as wrappers.
    pub wrapped_mode: bool,
    /// Whether constructing a wrapper switches wrapped mode on.
    pub auto_wrapped_mode: bool,
    pub debug_mode: DebugMode,
    pub trace_mode: TraceMode,
    /// Backend pushed onto every fresh context's stack.
    pub default_backend: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wrapped_mode: false,
            auto_wrapped_mode: true,
            debug_mode: DebugMode::Off,
            trace_mode: TraceMode::Full,
            default_backend: None,
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, falling back to defaults for absent keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_WRAPPED_MODE) {
            config.wrapped_mode = parse_flag(ENV_WRAPPED_MODE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_AUTO_WRAPPED_MODE) {
            config.auto_wrapped_mode = parse_flag(ENV_AUTO_WRAPPED_MODE, &raw)?;
        }
        if let Some(raw) = lookup(ENV_DEBUG_MODE) {
            config.debug_mode = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_TRACE_MODE) {
            config.trace_mode = raw.parse()?;
        }
        config.default_backend = lookup(ENV_DEFAULT_BACKEND)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        Ok(config)
    }

    pub fn with_wrapped_mode(mut self, wrapped: bool) -> Self {
        self.wrapped_mode = wrapped;
        self
    }

    pub fn with_auto_wrapped_mode(mut self, auto: bool) -> Self {
        self.auto_wrapped_mode = auto;
        self
    }

    pub fn with_debug_mode(mut self, mode: DebugMode) -> Self {
        self.debug_mode = mode;
        self
    }

    pub fn with_trace_mode(mut self, mode: TraceMode) -> Self {
        self.trace_mode = mode;
        self
    }

    pub fn with_default_backend(mut self, name: impl Into<String>) -> Self {
        self.default_backend = Some(name.into());
        self
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::invalid(format!("{key}: expected a boolean, got `{other}`"))),
    }
}

static PROCESS_CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

fn process_config() -> &'static RwLock<Config> {
    PROCESS_CONFIG.get_or_init(|| {
        let config = Config::from_env().unwrap_or_else(|err| {
            tracing::warn!(%err, "ignoring invalid environment configuration");
            Config::default()
        });
        RwLock::new(config)
    })
}

/// Replace the process defaults.
pub fn install(config: Config) {
    tracing::debug!(?config, "installing configuration");
    *process_config().write().unwrap_or_else(PoisonError::into_inner) = config;
}

/// The process defaults.
pub fn current() -> Config {
    process_config()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}
