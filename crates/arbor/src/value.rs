//! # Values
//!
//! [`Value`] is the closed set of things that flow through dispatch and live in
//! a [`Container`]: scalars and strings, native arrays, wrappers, sequences,
//! mappings, derived records and containers.
//!
//! A native array is whatever a backend library produces. The core only ever
//! sees it through [`NativeTensor`], which every backend implements for its own
//! array type, and carries it around as a cheaply cloned [`NativeArray`] handle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::array::{Array, Variable};
use crate::container::Container;
use crate::error::NativeError;

/// Keyword arguments passed to an operation.
pub type Kwargs = IndexMap<String, Value>;

/// Element type of a native array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Bool,
    U8,
    U32,
    I32,
    I64,
    F16,
    BF16,
    F32,
    F64,
    /// A type this crate has no name for; carries the backend's own name.
    Other(&'static str),
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "uint8",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F16 => "float16",
            DType::BF16 => "bfloat16",
            DType::F32 => "float32",
            DType::F64 => "float64",
            DType::Other(name) => *name,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16 | DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the core needs to know about a backend's array type.
///
/// # Implementation Notes
///
/// `backend_name` must match the [`Backend::name`](crate::backend::Backend::name)
/// of the backend that owns the type; classification relies on it.
/// `as_any` exists so kernels can downcast back to the concrete type.
pub trait NativeTensor: Any + fmt::Debug + Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn shape(&self) -> Vec<usize>;

    fn dtype(&self) -> DType;

    fn device(&self) -> String;

    /// Whether the array participates in gradient tracking.
    fn is_trainable(&self) -> bool {
        false
    }

    /// Whether the array is also usable as a plain, non-tracked array.
    ///
    /// Backends whose variables are a distinct type return `false` for them,
    /// which is what makes the exclusive variable check succeed.
    fn is_plain(&self) -> bool {
        !self.is_trainable()
    }

    /// The elements, row-major, widened to `f64`.
    fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError>;

    fn as_any(&self) -> &dyn Any;
}

/// A shared handle to a backend's native array.
#[derive(Clone)]
pub struct NativeArray(Arc<dyn NativeTensor>);

impl NativeArray {
    pub fn new<T: NativeTensor>(tensor: T) -> Self {
        Self(Arc::new(tensor))
    }

    pub fn downcast_ref<T: NativeTensor>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    pub fn backend_name(&self) -> &'static str {
        self.0.backend_name()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.shape()
    }

    pub fn dtype(&self) -> DType {
        self.0.dtype()
    }

    pub fn device(&self) -> String {
        self.0.device()
    }

    pub fn is_trainable(&self) -> bool {
        self.0.is_trainable()
    }

    pub fn is_plain(&self) -> bool {
        self.0.is_plain()
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError> {
        self.0.to_f64_vec()
    }

    /// Whether both handles point at the same array.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for NativeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for NativeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_f64_vec() {
            Ok(values) => write!(f, "{}.array({:?}, shape={:?})", self.backend_name(), values, self.shape()),
            Err(_) => write!(f, "{}.array(<unreadable>, shape={:?})", self.backend_name(), self.shape()),
        }
    }
}

impl PartialEq for NativeArray {
    /// Same backend, same shape and same elements.
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if self.backend_name() != other.backend_name() || self.shape() != other.shape() {
            return false;
        }
        match (self.to_f64_vec(), other.to_f64_vec()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

/// A named mapping, visited by conversions only when derived types are included.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub name: String,
    pub fields: IndexMap<String, Value>,
}

impl Record {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Anything that can be passed to, or returned from, an operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Native(NativeArray),
    Array(Array),
    Variable(Variable),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Dict(IndexMap<String, Value>),
    Record(Record),
    Container(Container),
}

impl Value {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Native(_) => "native array",
            Value::Array(_) => "array",
            Value::Variable(_) => "variable",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Record(_) => "record",
            Value::Container(_) => "container",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// The native array held directly or inside a wrapper.
    pub fn as_native(&self) -> Option<&NativeArray> {
        match self {
            Value::Native(n) => Some(n),
            Value::Array(a) => Some(a.data()),
            Value::Variable(v) => Some(v.data()),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Value::Container(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            Value::Int(i) => Some(*i as f64),
            Value::Float(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a list or tuple.
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<NativeArray> for Value {
    fn from(v: NativeArray) -> Self {
        Value::Native(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<Variable> for Value {
    fn from(v: Variable) -> Self {
        Value::Variable(v)
    }
}

impl From<Container> for Value {
    fn from(v: Container) -> Self {
        Value::Container(v)
    }
}

impl From<Record> for Value {
    fn from(v: Record) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Dict(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{item}")?;
            }
            Ok(())
        }

        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Native(n) => write!(f, "{n}"),
            Value::Array(a) => write!(f, "{a}"),
            Value::Variable(v) => write!(f, "{v}"),
            Value::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Value::Tuple(items) => {
                f.write_str("(")?;
                join(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Value::Dict(map) => {
                f.write_str("{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                f.write_str("}")
            }
            Value::Record(r) => {
                write!(f, "{}(", r.name)?;
                for (i, (k, v)) in r.fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}={v}")?;
                }
                f.write_str(")")
            }
            Value::Container(c) => write!(f, "{c}"),
        }
    }
}
