use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::NativeError;
use crate::value::{Kwargs, NativeArray, Value};

/// Result of running a kernel.
pub type KernelResult = std::result::Result<Value, NativeError>;

/// Signature every kernel is stored under.
pub type KernelFn = dyn Fn(&[Value], &Kwargs) -> KernelResult + Send + Sync;

/// How far dispatch unwraps arguments before calling a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgMode {
    /// Only top-level arguments are converted to native arrays.
    #[default]
    Top,
    /// Arguments are converted to native arrays at every nesting level.
    Nested,
}

/// A backend's implementation of one operation.
#[derive(Clone)]
pub struct Kernel {
    func: Arc<KernelFn>,
    arg_mode: ArgMode,
}

impl Kernel {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> KernelResult + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            arg_mode: ArgMode::Top,
        }
    }

    /// A kernel whose arguments are unwrapped at every nesting level.
    pub fn nested<F>(func: F) -> Self
    where
        F: Fn(&[Value], &Kwargs) -> KernelResult + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
            arg_mode: ArgMode::Nested,
        }
    }

    pub fn arg_mode(&self) -> ArgMode {
        self.arg_mode
    }

    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> KernelResult {
        (self.func)(args, kwargs)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel").field("arg_mode", &self.arg_mode).finish_non_exhaustive()
    }
}

/// Operation name to kernel, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct KernelTable {
    kernels: IndexMap<&'static str, Kernel>,
}

impl KernelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, op: &'static str, kernel: Kernel) -> Self {
        self.insert(op, kernel);
        self
    }

    /// Add or replace the kernel for `op`, returning the previous one.
    pub fn insert(&mut self, op: &'static str, kernel: Kernel) -> Option<Kernel> {
        self.kernels.insert(op, kernel)
    }

    pub fn get(&self, op: &str) -> Option<&Kernel> {
        self.kernels.get(op)
    }

    pub fn contains(&self, op: &str) -> bool {
        self.kernels.contains_key(op)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.kernels.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

/// A kernel failure described by a message.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct KernelError(pub String);

impl KernelError {
    pub fn boxed(message: impl Into<String>) -> NativeError {
        Box::new(KernelError(message.into()))
    }
}

/// The `index`th positional argument.
pub fn arg<'a>(args: &'a [Value], index: usize, op: &str) -> std::result::Result<&'a Value, NativeError> {
    args.get(index)
        .ok_or_else(|| KernelError::boxed(format!("{op} expects at least {} positional arguments, got {}", index + 1, args.len())))
}

/// The `index`th positional argument as a native array.
pub fn native_arg<'a>(args: &'a [Value], index: usize, op: &str) -> std::result::Result<&'a NativeArray, NativeError> {
    match arg(args, index, op)? {
        Value::Native(n) => Ok(n),
        other => Err(KernelError::boxed(format!("{op}: argument {index} must be an array, got {}", other.kind()))),
    }
}

/// Read an optional axis, from the keyword `axis` or the given positional slot.
///
/// Negative axes count from the end; `rank` bounds the result.
pub fn axis_arg(
    args: &[Value],
    kwargs: &Kwargs,
    position: usize,
    rank: usize,
    op: &str,
) -> std::result::Result<Option<usize>, NativeError> {
    let raw = match kwargs.get("axis").or_else(|| args.get(position)) {
        None | Some(Value::None) => return Ok(None),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| KernelError::boxed(format!("{op}: axis must be an integer, got {}", v.kind())))?,
    };
    normalize_axis(raw, rank, op).map(Some)
}

pub fn normalize_axis(axis: i64, rank: usize, op: &str) -> std::result::Result<usize, NativeError> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i {
        return Err(KernelError::boxed(format!("{op}: axis {axis} is out of bounds for rank {rank}")));
    }
    Ok(resolved as usize)
}

/// Read a target shape for `element_count` elements from the keyword `shape`
/// or the given positional slot. One entry may be `-1` and is inferred.
pub fn shape_arg(
    args: &[Value],
    kwargs: &Kwargs,
    position: usize,
    element_count: usize,
    op: &str,
) -> std::result::Result<Vec<usize>, NativeError> {
    let raw = kwargs
        .get("shape")
        .or_else(|| args.get(position))
        .ok_or_else(|| KernelError::boxed(format!("{op}: missing `shape`")))?;
    let dims = raw
        .as_sequence()
        .ok_or_else(|| KernelError::boxed(format!("{op}: shape must be a list of integers, got {}", raw.kind())))?
        .iter()
        .map(|d| d.as_i64().ok_or_else(|| KernelError::boxed(format!("{op}: shape entries must be integers"))))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut inferred = None;
    let mut known = 1usize;
    for (i, &d) in dims.iter().enumerate() {
        match d {
            -1 if inferred.is_none() => inferred = Some(i),
            d if d >= 0 => {
                known = known
                    .checked_mul(d as usize)
                    .ok_or_else(|| KernelError::boxed(format!("{op}: shape {dims:?} overflows")))?;
            }
            _ => return Err(KernelError::boxed(format!("{op}: invalid shape {dims:?}"))),
        }
    }

    let mut shape: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = inferred {
        if known == 0 || element_count % known != 0 {
            return Err(KernelError::boxed(format!("{op}: cannot infer shape {dims:?} for {element_count} elements")));
        }
        shape[i] = element_count / known;
    }
    let total = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
    if total != Some(element_count) {
        return Err(KernelError::boxed(format!("{op}: cannot reshape {element_count} elements into {shape:?}")));
    }
    Ok(shape)
}

/// Broadcast two shapes together, trailing dimensions first.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> std::result::Result<Vec<usize>, NativeError> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let da = if i < rank - a.len() { 1 } else { a[i - (rank - a.len())] };
        let db = if i < rank - b.len() { 1 } else { b[i - (rank - b.len())] };
        out[i] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(KernelError::boxed(format!(
                    "operands could not be broadcast together with shapes {a:?} {b:?}"
                )));
            }
        };
    }
    Ok(out)
}
