//! # Execution Context
//!
//! The state every dispatched call resolves against: the stack of active
//! backends, whether results come back wrapped, how backend failures are
//! surfaced and how much of a native error trace is kept.
//!
//! ## Scoping
//!
//! There is no process-wide mutable state here. Each thread owns an ambient
//! [`Context`], seeded from [`config::current`](crate::config::current) the
//! first time it is touched. An async task can run under a context of its own
//! with [`scope`], and a synchronous closure with [`enter`]; inside either, all
//! of the free functions in this module and in the registry read and write that
//! context instead of the thread's.
//!
//! A [`Context`] is also an ordinary value: take one with [`snapshot`], adjust
//! it with the `with_*` builders and hand it to
//! [`dispatch_in`](crate::dispatch::dispatch_in) to run a call without touching
//! ambient state at all.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

use crate::backend::BackendHandle;
use crate::config::{self, Config};
use crate::error::{Error, Result};

/// How a failing backend kernel is surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Failures are normalized into [`Error::Backend`].
    #[default]
    Off,
    /// The backend's error is returned untouched as [`Error::Native`].
    Exception,
    /// The failing call panics, so a debugger breaking on panic stops at the failure.
    Breakpoint,
}

/// How much of a native error ends up in a normalized message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    /// Debug rendering of the native error plus its source chain.
    #[default]
    Full,
    /// Only the native error's display message.
    Summary,
}

impl FromStr for DebugMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" | "false" | "0" => Ok(DebugMode::Off),
            "exception" => Ok(DebugMode::Exception),
            "breakpoint" => Ok(DebugMode::Breakpoint),
            other => Err(Error::invalid(format!("unknown debug mode `{other}`"))),
        }
    }
}

impl FromStr for TraceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(TraceMode::Full),
            "summary" | "frontend" => Ok(TraceMode::Summary),
            other => Err(Error::invalid(format!("unknown trace mode `{other}`"))),
        }
    }
}

/// Backend stack plus mode flags for one thread, task or explicit call.
#[derive(Clone)]
pub struct Context {
    stack: Vec<BackendHandle>,
    wrapped: bool,
    auto_wrapped: bool,
    debug: DebugMode,
    trace: TraceMode,
}

impl Context {
    /// An empty context: no backends, wrapped mode off, implicit enabling on.
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            wrapped: false,
            auto_wrapped: true,
            debug: DebugMode::Off,
            trace: TraceMode::Full,
        }
    }

    /// A context seeded from `config`.
    ///
    /// A configured default backend that is not registered is skipped with a
    /// warning rather than failing thread start-up.
    pub fn from_config(config: &Config) -> Self {
        let mut ctx = Self {
            stack: Vec::new(),
            wrapped: config.wrapped_mode,
            auto_wrapped: config.auto_wrapped_mode,
            debug: config.debug_mode,
            trace: config.trace_mode,
        };
        if let Some(name) = &config.default_backend {
            match crate::backend::get_backend(name) {
                Ok(handle) => ctx.stack.push(handle),
                Err(err) => tracing::warn!(backend = %name, %err, "configured default backend unavailable"),
            }
        }
        ctx
    }

    pub fn with_backend(mut self, handle: BackendHandle) -> Self {
        self.stack.push(handle);
        self
    }

    pub fn with_wrapped_mode(mut self, wrapped: bool) -> Self {
        self.wrapped = wrapped;
        self
    }

    pub fn with_auto_wrapped_mode(mut self, auto: bool) -> Self {
        self.auto_wrapped = auto;
        self
    }

    pub fn with_debug_mode(mut self, mode: DebugMode) -> Self {
        self.debug = mode;
        self
    }

    pub fn with_trace_mode(mut self, mode: TraceMode) -> Self {
        self.trace = mode;
        self
    }

    /// Top of the backend stack, if any.
    pub fn current_backend(&self) -> Option<&BackendHandle> {
        self.stack.last()
    }

    /// The backend stack, bottom first.
    pub fn backend_stack(&self) -> &[BackendHandle] {
        &self.stack
    }

    pub fn wrapped_mode(&self) -> bool {
        self.wrapped
    }

    pub fn auto_wrapped_mode(&self) -> bool {
        self.auto_wrapped
    }

    pub fn debug_mode(&self) -> DebugMode {
        self.debug
    }

    pub fn trace_mode(&self) -> TraceMode {
        self.trace
    }

    pub(crate) fn push_backend(&mut self, handle: BackendHandle) {
        self.stack.push(handle);
    }

    pub(crate) fn pop_backend(&mut self) -> Result<BackendHandle> {
        self.stack.pop().ok_or(Error::EmptyBackendStack)
    }

    pub(crate) fn truncate_backends(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    pub(crate) fn clear_backends(&mut self) {
        self.stack.clear();
    }

    pub(crate) fn set_wrapped(&mut self, wrapped: bool) {
        self.wrapped = wrapped;
    }

    pub(crate) fn set_debug(&mut self, mode: DebugMode) {
        self.debug = mode;
    }

    pub(crate) fn set_trace(&mut self, mode: TraceMode) {
        self.trace = mode;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("stack", &self.stack.iter().map(|b| b.name()).collect::<Vec<_>>())
            .field("wrapped", &self.wrapped)
            .field("auto_wrapped", &self.auto_wrapped)
            .field("debug", &self.debug)
            .field("trace", &self.trace)
            .finish()
    }
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_CONTEXT: RefCell<Context>;
}

fn in_task_scope() -> bool {
    TASK_CONTEXT.try_with(|_| ()).is_ok()
}

/// Run `f` against the ambient context.
///
/// No borrow is held once `f` returns; `f` itself must not call back into
/// ambient-context functions.
pub(crate) fn with_context<R>(f: impl FnOnce(&Context) -> R) -> R {
    if in_task_scope() {
        return TASK_CONTEXT.with(|ctx| f(&ctx.borrow()));
    }
    THREAD_CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let ctx = slot.get_or_insert_with(|| Context::from_config(&config::current()));
        f(ctx)
    })
}

pub(crate) fn with_context_mut<R>(f: impl FnOnce(&mut Context) -> R) -> R {
    if in_task_scope() {
        return TASK_CONTEXT.with(|ctx| f(&mut ctx.borrow_mut()));
    }
    THREAD_CONTEXT.with(|slot| {
        let mut slot = slot.borrow_mut();
        let ctx = slot.get_or_insert_with(|| Context::from_config(&config::current()));
        f(ctx)
    })
}

/// A copy of the ambient context.
pub fn snapshot() -> Context {
    with_context(Context::clone)
}

/// Replace the ambient context, returning the previous one.
pub fn replace(ctx: Context) -> Context {
    with_context_mut(|current| std::mem::replace(current, ctx))
}

/// Run `future` with `ctx` as its ambient context.
///
/// The context lives for the duration of the future and is dropped with it;
/// nothing leaks back into the polling thread.
pub async fn scope<F: Future>(ctx: Context, future: F) -> F::Output {
    TASK_CONTEXT.scope(RefCell::new(ctx), future).await
}

/// Run `f` with `ctx` as its ambient context, restoring the previous one afterwards.
pub fn enter<R>(ctx: Context, f: impl FnOnce() -> R) -> R {
    TASK_CONTEXT.sync_scope(RefCell::new(ctx), f)
}

/// Make dispatched operations return wrapper instances.
pub fn set_wrapped_mode() {
    with_context_mut(|ctx| ctx.set_wrapped(true));
}

/// Make dispatched operations return native values.
pub fn unset_wrapped_mode() {
    with_context_mut(|ctx| ctx.set_wrapped(false));
}

pub fn wrapped_mode() -> bool {
    with_context(Context::wrapped_mode)
}

/// Called when user code builds a wrapper; turns wrapped mode on if allowed.
pub(crate) fn note_wrapper_constructed() {
    with_context_mut(|ctx| {
        if !ctx.wrapped && ctx.auto_wrapped {
            tracing::info!("enabling wrapped mode; wrapper instances are not supported in non-wrapped mode");
            ctx.wrapped = true;
        }
    });
}

pub fn set_debug_mode(mode: DebugMode) {
    with_context_mut(|ctx| ctx.set_debug(mode));
}

pub fn set_exception_debug_mode() {
    set_debug_mode(DebugMode::Exception);
}

pub fn set_breakpoint_debug_mode() {
    set_debug_mode(DebugMode::Breakpoint);
}

pub fn unset_debug_mode() {
    set_debug_mode(DebugMode::Off);
}

pub fn debug_mode() -> DebugMode {
    with_context(Context::debug_mode)
}

pub fn set_trace_mode(mode: TraceMode) {
    with_context_mut(|ctx| ctx.set_trace(mode));
}

pub fn trace_mode() -> TraceMode {
    with_context(Context::trace_mode)
}
