//! # Dispatch
//!
//! [`dispatch`] runs a named operation on whichever backend the call resolves
//! to:
//!
//! 1. If any argument, positional or keyword, is a [`Container`], the
//!    operation is applied leaf-wise across the containers (other arguments
//!    are broadcast) and a container comes back.
//! 2. The backend is resolved from the explicit choice, the arguments, or the
//!    backend stack.
//! 3. Wrappers are unwrapped (top level only, or at every level for kernels
//!    registered as nested).
//! 4. The kernel runs. A failure is normalized, passed through or turned into
//!    a panic, depending on the debug mode.
//! 5. In wrapped mode native results are wrapped on the way out.

use std::fmt;

use crate::backend::{ArgMode, BackendHandle, resolve_in};
use crate::container::{Container, MapOptions};
use crate::context::{self, Context, DebugMode};
use crate::convert::{to_native, to_wrapper_in};
use crate::error::{Error, Result};
use crate::value::{Kwargs, Value};

/// Positional and keyword arguments for one call, plus an optional explicit backend.
#[derive(Clone, Default, PartialEq)]
pub struct Args {
    positional: Vec<Value>,
    kwargs: Kwargs,
    backend: Option<BackendHandle>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Run on `backend` regardless of the arguments and the backend stack.
    pub fn backend(mut self, backend: BackendHandle) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    pub fn explicit_backend(&self) -> Option<&BackendHandle> {
        self.backend.as_ref()
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("positional", &self.positional.iter().map(Value::kind).collect::<Vec<_>>())
            .field("kwargs", &self.kwargs.keys().collect::<Vec<_>>())
            .field("backend", &self.backend.as_ref().map(|b| b.name()))
            .finish()
    }
}

/// Build [`Args`] from positional values.
///
/// ```ignore
/// let args = args![x, 1];
/// ```
#[macro_export]
macro_rules! args {
    ($($value:expr),* $(,)?) => {
        $crate::Args::new()$(.arg($value))*
    };
}

/// Run `op` against the ambient context.
pub fn dispatch(op: &str, args: Args) -> Result<Value> {
    let ctx = context::snapshot();
    dispatch_in(&ctx, op, args)
}

/// Run `op` against `ctx`; ambient state is neither read nor written.
pub fn dispatch_in(ctx: &Context, op: &str, args: Args) -> Result<Value> {
    if args
        .positional
        .iter()
        .chain(args.kwargs.values())
        .any(|a| matches!(a, Value::Container(_)))
    {
        return dispatch_nested(ctx, op, args);
    }

    let backend = resolve_in(
        ctx,
        args.positional.iter().chain(args.kwargs.values()),
        args.backend.as_ref(),
    )?;
    let kernel = backend.kernels().get(op).ok_or_else(|| Error::UnsupportedOperation {
        op: op.to_string(),
        backend: backend.name().to_string(),
    })?;

    let nested = kernel.arg_mode() == ArgMode::Nested;
    let positional: Vec<Value> = args.positional.into_iter().map(|a| to_native(a, nested, false)).collect();
    let kwargs: Kwargs = args
        .kwargs
        .into_iter()
        .map(|(k, v)| (k, to_native(v, nested, false)))
        .collect();

    let span = tracing::debug_span!("dispatch", op, backend = backend.name());
    let _enter = span.enter();

    let out = match kernel.call(&positional, &kwargs) {
        Ok(out) => out,
        Err(native) => {
            return match ctx.debug_mode() {
                DebugMode::Off => {
                    let err = Error::backend(op, backend.name(), native, ctx.trace_mode());
                    tracing::debug!(%err, "kernel failed");
                    Err(err)
                }
                DebugMode::Exception => Err(Error::Native(native)),
                DebugMode::Breakpoint => panic!("{}: {op}: {native}", backend.name()),
            };
        }
    };

    if ctx.wrapped_mode() {
        Ok(to_wrapper_in(ctx, out, true))
    } else {
        Ok(out)
    }
}

// Leaf-wise application over container arguments. Keyword values follow the
// positional ones in the multi-map inputs, so a positional container leads.
fn dispatch_nested(ctx: &Context, op: &str, args: Args) -> Result<Value> {
    let Args {
        positional,
        kwargs,
        backend,
    } = args;
    let split = positional.len();
    let names: Vec<String> = kwargs.keys().cloned().collect();
    let inputs: Vec<Value> = positional.into_iter().chain(kwargs.into_values()).collect();
    let out = Container::multi_map(
        &inputs,
        |leaves, _| {
            let (positional, keyword) = leaves.split_at(split);
            let call = Args {
                positional: positional.to_vec(),
                kwargs: names.iter().cloned().zip(keyword.iter().cloned()).collect(),
                backend: backend.clone(),
            };
            dispatch_in(ctx, op, call)
        },
        &MapOptions::default(),
    )?;
    Ok(Value::Container(out))
}
