//! Known backends, backend resolution and the backend stack.
//!
//! The registry is process-wide and only ever grows or replaces entries by
//! name. The backend stack belongs to the ambient
//! [`Context`](crate::context::Context), so each thread or scoped task sees
//! its own.

use std::marker::PhantomData;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::backend::BackendHandle;
use crate::backend::ndarray::NdArrayBackend;
use crate::context::{self, Context};
use crate::error::{Error, Result};
use crate::value::{NativeArray, Value};

static REGISTRY: OnceLock<RwLock<Vec<BackendHandle>>> = OnceLock::new();

fn builtin_backends() -> Vec<BackendHandle> {
    #[allow(unused_mut)]
    let mut builtins = vec![BackendHandle::new(NdArrayBackend::new())];
    #[cfg(feature = "candle")]
    builtins.push(BackendHandle::new(crate::backend::candle::CandleBackend::new(
        ::candle_core::Device::Cpu,
    )));
    #[cfg(feature = "burn")]
    builtins.push(BackendHandle::new(crate::backend::burn::NdArrayBurnBackend::default()));

    builtins
        .into_iter()
        .filter(|handle| match handle.check_capabilities() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(backend = handle.name(), %err, "built-in backend failed its capability check");
                false
            }
        })
        .collect()
}

fn registry() -> &'static RwLock<Vec<BackendHandle>> {
    REGISTRY.get_or_init(|| RwLock::new(builtin_backends()))
}

/// Add a backend to the registry after checking its declared op families.
///
/// A backend registered under an existing name replaces the old one.
pub fn register_backend(handle: BackendHandle) -> Result<()> {
    handle.check_capabilities()?;
    let mut backends = registry().write().unwrap_or_else(PoisonError::into_inner);
    match backends.iter().position(|b| b.name() == handle.name()) {
        Some(i) => {
            tracing::warn!(backend = handle.name(), "replacing registered backend");
            backends[i] = handle;
        }
        None => {
            tracing::debug!(backend = handle.name(), families = ?handle.families(), "registering backend");
            backends.push(handle);
        }
    }
    Ok(())
}

/// Every registered backend, in registration order.
pub fn registered_backends() -> Vec<BackendHandle> {
    registry().read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Look a backend up by name.
pub fn get_backend(name: &str) -> Result<BackendHandle> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .find(|b| b.name() == name)
        .cloned()
        .ok_or_else(|| Error::UnknownBackend(name.to_string()))
}

/// The registered backend that owns `x`, if any.
pub fn backend_of(x: &NativeArray) -> Option<BackendHandle> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .find(|b| b.is_native(x))
        .cloned()
}

/// Visit native arrays in argument order, descending into sequences,
/// mappings, records and containers. Stops when `f` returns `Some`.
fn find_native<T>(value: &Value, f: &mut impl FnMut(&NativeArray) -> Option<T>) -> Option<T> {
    match value {
        Value::Native(n) => f(n),
        Value::Array(a) => f(a.data()),
        Value::Variable(v) => f(v.data()),
        Value::List(items) | Value::Tuple(items) => items.iter().find_map(|v| find_native(v, f)),
        Value::Dict(map) => map.values().find_map(|v| find_native(v, f)),
        Value::Record(r) => r.fields.values().find_map(|v| find_native(v, f)),
        Value::Container(c) => c.values().find_map(|v| find_native(v, f)),
        _ => None,
    }
}

/// Pick the backend a call runs on.
///
/// In order: the explicit backend if given; the backend of the first argument
/// (scanning left to right, into nested values) that belongs to a registered
/// backend; the top of `ctx`'s backend stack. Otherwise [`Error::NoBackendFound`].
pub fn resolve_in<'a>(
    ctx: &Context,
    args: impl IntoIterator<Item = &'a Value>,
    explicit: Option<&BackendHandle>,
) -> Result<BackendHandle> {
    if let Some(handle) = explicit {
        return Ok(handle.clone());
    }
    let known = registered_backends();
    let owner = args.into_iter().find_map(|arg| {
        find_native(arg, &mut |n: &NativeArray| known.iter().find(|b| b.is_native(n)).cloned())
    });
    if let Some(handle) = owner {
        return Ok(handle);
    }
    ctx.current_backend().cloned().ok_or(Error::NoBackendFound)
}

/// [`resolve_in`] against the ambient context.
pub fn resolve(args: &[Value], explicit: Option<&BackendHandle>) -> Result<BackendHandle> {
    let ctx = context::snapshot();
    resolve_in(&ctx, args, explicit)
}

/// Backend for a single native array: its owner, else the current backend.
pub(crate) fn resolve_native(x: &NativeArray) -> Result<BackendHandle> {
    backend_of(x)
        .or_else(current_backend)
        .ok_or(Error::NoBackendFound)
}

/// Push `handle` onto the ambient backend stack.
pub fn push_backend(handle: BackendHandle) {
    tracing::debug!(backend = handle.name(), "push backend");
    context::with_context_mut(|ctx| ctx.push_backend(handle));
}

/// Pop the ambient backend stack; [`Error::EmptyBackendStack`] when it is empty.
pub fn pop_backend() -> Result<BackendHandle> {
    let popped = context::with_context_mut(Context::pop_backend)?;
    tracing::debug!(backend = popped.name(), "pop backend");
    Ok(popped)
}

/// Top of the ambient backend stack.
pub fn current_backend() -> Option<BackendHandle> {
    context::with_context(|ctx| ctx.current_backend().cloned())
}

/// The ambient backend stack, bottom first.
pub fn backend_stack() -> Vec<BackendHandle> {
    context::with_context(|ctx| ctx.backend_stack().to_vec())
}

pub fn clear_backend_stack() {
    context::with_context_mut(Context::clear_backends);
}

/// Push the registered backend called `name`.
pub fn set_backend_by_name(name: &str) -> Result<()> {
    push_backend(get_backend(name)?);
    Ok(())
}

/// Pops the backend stack back to its depth at creation when dropped.
///
/// Tied to the thread (or scoped task) that created it.
#[must_use = "the backend is popped as soon as the guard is dropped"]
pub struct BackendGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for BackendGuard {
    fn drop(&mut self) {
        context::with_context_mut(|ctx| ctx.truncate_backends(self.depth));
    }
}

/// Make `handle` the current backend until the returned guard is dropped.
pub fn use_backend(handle: BackendHandle) -> BackendGuard {
    let depth = context::with_context_mut(|ctx| {
        let depth = ctx.backend_stack().len();
        ctx.push_backend(handle);
        depth
    });
    BackendGuard {
        depth,
        _not_send: PhantomData,
    }
}

/// Run `f` with `handle` as the current backend.
pub fn with_backend<R>(handle: BackendHandle, f: impl FnOnce() -> R) -> R {
    let _guard = use_backend(handle);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock_tensor::{MockBackend, mock_array};
    use crate::backend::ndarray::ndarray_from;
    use crate::context::enter;

    fn mock() -> BackendHandle {
        let handle = BackendHandle::new(MockBackend::new());
        register_backend(handle.clone()).unwrap();
        handle
    }

    #[test]
    fn test_ndarray_is_always_registered() {
        let ndarray = get_backend("ndarray").unwrap();
        assert_eq!(ndarray.name(), "ndarray");
        assert!(registered_backends().iter().any(|b| b.name() == "ndarray"));
        assert!(matches!(get_backend("tensorflow"), Err(Error::UnknownBackend(n)) if n == "tensorflow"));
    }

    #[test]
    fn test_resolution_prefers_first_known_argument() {
        let mock = mock();
        enter(Context::new(), || {
            let args = [Value::Int(1), mock_array(vec![2], 3.0), Value::Native(ndarray_from(&[1.0], &[1]))];
            assert_eq!(resolve(&args, None).unwrap(), mock);

            let args = [Value::Native(ndarray_from(&[1.0], &[1])), mock_array(vec![2], 3.0)];
            assert_eq!(resolve(&args, None).unwrap().name(), "ndarray");
        });
    }

    #[test]
    fn test_argument_owner_wins_over_stack() {
        let mock = mock();
        enter(Context::new(), || {
            push_backend(mock.clone());
            assert_eq!(resolve(&[], None).unwrap(), mock);

            let args = [Value::Int(1), Value::Native(ndarray_from(&[1.0], &[1]))];
            assert_eq!(resolve(&args, None).unwrap().name(), "ndarray");

            let out = crate::dispatch("add", crate::args![Value::Native(ndarray_from(&[1.0, 2.0], &[2])), 1]).unwrap();
            assert!(get_backend("ndarray").unwrap().is_native(out.as_native().unwrap()));
            assert_eq!(current_backend().unwrap(), mock);
        });
    }

    #[test]
    fn test_resolution_descends_into_nested_arguments() {
        let mock = mock();
        enter(Context::new(), || {
            let args = [Value::List(vec![Value::None, mock_array(vec![1], 1.0)])];
            assert_eq!(resolve(&args, None).unwrap(), mock);
        });
    }

    #[test]
    fn test_explicit_backend_wins() {
        let mock = mock();
        enter(Context::new(), || {
            let args = [Value::Native(ndarray_from(&[1.0], &[1]))];
            assert_eq!(resolve(&args, Some(&mock)).unwrap(), mock);
        });
    }

    #[test]
    fn test_falls_back_to_stack_then_fails() {
        let mock = mock();
        enter(Context::new(), || {
            assert!(matches!(resolve(&[Value::Int(1)], None), Err(Error::NoBackendFound)));
            push_backend(mock.clone());
            assert_eq!(resolve(&[Value::Int(1)], None).unwrap(), mock);
        });
    }

    #[test]
    fn test_push_pop() {
        enter(Context::new(), || {
            assert!(matches!(pop_backend(), Err(Error::EmptyBackendStack)));
            set_backend_by_name("ndarray").unwrap();
            assert_eq!(current_backend().unwrap().name(), "ndarray");
            assert_eq!(pop_backend().unwrap().name(), "ndarray");
            assert!(current_backend().is_none());
            assert!(matches!(set_backend_by_name("nope"), Err(Error::UnknownBackend(_))));
        });
    }

    #[test]
    fn test_guard_restores_depth() {
        let mock = mock();
        enter(Context::new(), || {
            set_backend_by_name("ndarray").unwrap();
            {
                let _guard = use_backend(mock.clone());
                // an unbalanced push inside the scope is unwound too
                push_backend(mock.clone());
                assert_eq!(backend_stack().len(), 3);
            }
            assert_eq!(backend_stack().len(), 1);
            assert_eq!(with_backend(mock.clone(), || current_backend().unwrap().name()), "mock");
            assert_eq!(current_backend().unwrap().name(), "ndarray");
            clear_backend_stack();
            assert!(backend_stack().is_empty());
        });
    }

    #[test]
    fn test_reregistering_replaces() {
        mock();
        mock();
        let count = registered_backends().iter().filter(|b| b.name() == "mock").count();
        assert_eq!(count, 1);
    }
}
