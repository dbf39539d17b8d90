//! Backend over `ndarray::ArrayD<f64>`.
//!
//! Plain arrays are `ArrayD<f64>`. Trainable arrays are the distinct
//! [`NdVariable`] type, so they are variables in the exclusive sense too.
//! Kernels accept either as input and always return plain arrays.

use std::any::Any;

use ::ndarray::{ArrayD, ArrayViewD, Axis, Ix2, IxDyn, Zip};

use crate::backend::{
    Backend, Kernel, KernelError, KernelResult, KernelTable, OpFamily, arg, axis_arg, broadcast_shapes,
    shape_arg,
};
use crate::error::NativeError;
use crate::value::{DType, Kwargs, NativeArray, NativeTensor, Value};

pub const NAME: &str = "ndarray";

impl NativeTensor for ArrayD<f64> {
    fn backend_name(&self) -> &'static str {
        NAME
    }

    fn shape(&self) -> Vec<usize> {
        ArrayD::shape(self).to_vec()
    }

    fn dtype(&self) -> DType {
        DType::F64
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError> {
        Ok(self.iter().copied().collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A trainable ndarray array.
#[derive(Clone, Debug, PartialEq)]
pub struct NdVariable {
    data: ArrayD<f64>,
}

impl NdVariable {
    pub fn new(data: ArrayD<f64>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }
}

impl NativeTensor for NdVariable {
    fn backend_name(&self) -> &'static str {
        NAME
    }

    fn shape(&self) -> Vec<usize> {
        self.data.shape().to_vec()
    }

    fn dtype(&self) -> DType {
        DType::F64
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    fn is_trainable(&self) -> bool {
        true
    }

    fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError> {
        Ok(self.data.iter().copied().collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
pub(crate) fn ndarray_from(data: &[f64], shape: &[usize]) -> NativeArray {
    match ArrayD::from_shape_vec(IxDyn(shape), data.to_vec()) {
        Ok(array) => NativeArray::new(array),
        Err(err) => panic!("{} values do not fit shape {shape:?}: {err}", data.len()),
    }
}

pub struct NdArrayBackend {
    kernels: KernelTable,
}

impl NdArrayBackend {
    pub fn new() -> Self {
        let kernels = KernelTable::new()
            .with("add", Kernel::new(|a, _| binary(a, "add", |x, y| x + y)))
            .with("subtract", Kernel::new(|a, _| binary(a, "subtract", |x, y| x - y)))
            .with("multiply", Kernel::new(|a, _| binary(a, "multiply", |x, y| x * y)))
            .with("divide", Kernel::new(|a, _| binary(a, "divide", |x, y| x / y)))
            .with("negative", Kernel::new(|a, _| unary(a, "negative", |x| -x)))
            .with("abs", Kernel::new(|a, _| unary(a, "abs", f64::abs)))
            .with("exp", Kernel::new(|a, _| unary(a, "exp", f64::exp)))
            .with("log", Kernel::new(|a, _| unary(a, "log", f64::ln)))
            .with("sqrt", Kernel::new(|a, _| unary(a, "sqrt", f64::sqrt)))
            .with("sum", Kernel::new(sum))
            .with("mean", Kernel::new(mean))
            .with("max", Kernel::new(|a, k| extremum(a, k, "max", f64::max)))
            .with("min", Kernel::new(|a, k| extremum(a, k, "min", f64::min)))
            .with("matmul", Kernel::new(matmul))
            .with("transpose", Kernel::new(transpose))
            .with("reshape", Kernel::new(reshape))
            .with("concat", Kernel::nested(concat));
        Self { kernels }
    }
}

impl Default for NdArrayBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for NdArrayBackend {
    fn name(&self) -> &'static str {
        NAME
    }

    fn families(&self) -> &[OpFamily] {
        &OpFamily::ALL
    }

    fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    fn variable(&self, x: &NativeArray) -> Result<NativeArray, NativeError> {
        if let Some(var) = x.downcast_ref::<NdVariable>() {
            return Ok(NativeArray::new(var.clone()));
        }
        let data = as_ndarray(x, "variable")?;
        Ok(NativeArray::new(NdVariable::new(data.clone())))
    }

    fn from_f64(&self, data: &[f64], shape: &[usize]) -> Result<NativeArray, NativeError> {
        Ok(NativeArray::new(ArrayD::from_shape_vec(IxDyn(shape), data.to_vec())?))
    }
}

fn as_ndarray<'a>(x: &'a NativeArray, op: &str) -> Result<&'a ArrayD<f64>, NativeError> {
    x.downcast_ref::<ArrayD<f64>>()
        .or_else(|| x.downcast_ref::<NdVariable>().map(NdVariable::data))
        .ok_or_else(|| KernelError::boxed(format!("{op}: expected an ndarray array, got {x:?}")))
}

enum Operand<'a> {
    Array(&'a ArrayD<f64>),
    Scalar(f64),
}

fn operand<'a>(value: &'a Value, op: &str) -> Result<Operand<'a>, NativeError> {
    match value {
        Value::Native(n) => as_ndarray(n, op).map(Operand::Array),
        other => other
            .as_f64()
            .map(Operand::Scalar)
            .ok_or_else(|| KernelError::boxed(format!("{op}: unsupported operand {}", other.kind()))),
    }
}

fn array_arg<'a>(args: &'a [Value], index: usize, op: &str) -> Result<&'a ArrayD<f64>, NativeError> {
    match operand(arg(args, index, op)?, op)? {
        Operand::Array(a) => Ok(a),
        Operand::Scalar(_) => Err(KernelError::boxed(format!("{op}: argument {index} must be an array"))),
    }
}

fn wrap(array: ArrayD<f64>) -> KernelResult {
    Ok(Value::Native(NativeArray::new(array)))
}

fn scalar(x: f64) -> KernelResult {
    wrap(ArrayD::from_elem(IxDyn(&[]), x))
}

fn binary(args: &[Value], op: &str, f: impl Fn(f64, f64) -> f64) -> KernelResult {
    let lhs = operand(arg(args, 0, op)?, op)?;
    let rhs = operand(arg(args, 1, op)?, op)?;
    match (lhs, rhs) {
        (Operand::Scalar(x), Operand::Scalar(y)) => scalar(f(x, y)),
        (Operand::Array(a), Operand::Scalar(y)) => wrap(a.mapv(|x| f(x, y))),
        (Operand::Scalar(x), Operand::Array(b)) => wrap(b.mapv(|y| f(x, y))),
        (Operand::Array(a), Operand::Array(b)) => {
            let shape = broadcast_shapes(a.shape(), b.shape())?;
            let (av, bv) = match (a.broadcast(IxDyn(&shape)), b.broadcast(IxDyn(&shape))) {
                (Some(av), Some(bv)) => (av, bv),
                _ => {
                    return Err(KernelError::boxed(format!(
                        "operands could not be broadcast together with shapes {:?} {:?}",
                        a.shape(),
                        b.shape()
                    )));
                }
            };
            wrap(Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y)))
        }
    }
}

fn unary(args: &[Value], op: &str, f: impl Fn(f64) -> f64) -> KernelResult {
    match operand(arg(args, 0, op)?, op)? {
        Operand::Array(a) => wrap(a.mapv(f)),
        Operand::Scalar(x) => scalar(f(x)),
    }
}

fn sum(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let a = array_arg(args, 0, "sum")?;
    match axis_arg(args, kwargs, 1, a.ndim(), "sum")? {
        Some(axis) => wrap(a.sum_axis(Axis(axis))),
        None => scalar(a.sum()),
    }
}

fn mean(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let a = array_arg(args, 0, "mean")?;
    let out = match axis_arg(args, kwargs, 1, a.ndim(), "mean")? {
        Some(axis) => a.mean_axis(Axis(axis)),
        None => a.mean().map(|m| ArrayD::from_elem(IxDyn(&[]), m)),
    };
    out.map_or_else(|| Err(KernelError::boxed("mean: empty array")), wrap)
}

fn extremum(args: &[Value], kwargs: &Kwargs, op: &str, pick: fn(f64, f64) -> f64) -> KernelResult {
    let a = array_arg(args, 0, op)?;
    if a.is_empty() {
        return Err(KernelError::boxed(format!("{op}: zero-size array has no {op}")));
    }
    match axis_arg(args, kwargs, 1, a.ndim(), op)? {
        Some(axis) => wrap(a.map_axis(Axis(axis), |lane| lane.iter().copied().reduce(pick).unwrap_or(f64::NAN))),
        None => scalar(a.iter().copied().reduce(pick).unwrap_or(f64::NAN)),
    }
}

fn matmul(args: &[Value], _kwargs: &Kwargs) -> KernelResult {
    let a = array_arg(args, 0, "matmul")?.view().into_dimensionality::<Ix2>()?;
    let b = array_arg(args, 1, "matmul")?.view().into_dimensionality::<Ix2>()?;
    if a.ncols() != b.nrows() {
        return Err(KernelError::boxed(format!(
            "matmul: inner dimensions differ, {:?} @ {:?}",
            a.shape(),
            b.shape()
        )));
    }
    wrap(a.dot(&b).into_dyn())
}

fn transpose(args: &[Value], _kwargs: &Kwargs) -> KernelResult {
    wrap(array_arg(args, 0, "transpose")?.t().to_owned())
}

fn reshape(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let a = array_arg(args, 0, "reshape")?;
    let shape = shape_arg(args, kwargs, 1, a.len(), "reshape")?;
    let flat: Vec<f64> = a.iter().copied().collect();
    wrap(ArrayD::from_shape_vec(IxDyn(&shape), flat)?)
}

fn concat(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let items = arg(args, 0, "concat")?
        .as_sequence()
        .ok_or_else(|| KernelError::boxed("concat: expected a list of arrays"))?;
    let arrays = items
        .iter()
        .map(|item| match item {
            Value::Native(n) => as_ndarray(n, "concat"),
            other => Err(KernelError::boxed(format!("concat: expected arrays, got {}", other.kind()))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let first = arrays
        .first()
        .ok_or_else(|| KernelError::boxed("concat: need at least one array"))?;
    let axis = axis_arg(&[], kwargs, 0, first.ndim(), "concat")?.unwrap_or(0);
    let views: Vec<ArrayViewD<f64>> = arrays.iter().map(|a| a.view()).collect();
    wrap(::ndarray::concatenate(Axis(axis), &views)?)
}
