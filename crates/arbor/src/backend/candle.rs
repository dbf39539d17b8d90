use std::any::Any;

use candle_core::{DType as CandleDType, Device, Tensor, Var};

use crate::backend::{
    Backend, Kernel, KernelError, KernelResult, KernelTable, OpFamily, arg, axis_arg, shape_arg,
};
use crate::error::NativeError;
use crate::value::{DType, Kwargs, NativeArray, NativeTensor, Value};

pub const NAME: &str = "candle";

type BinaryOp = fn(&Tensor, &Tensor) -> candle_core::Result<Tensor>;
type UnaryOp = fn(&Tensor) -> candle_core::Result<Tensor>;

fn device_name(device: &Device) -> String {
    if device.is_cuda() {
        "gpu".to_string()
    } else if device.is_metal() {
        "metal".to_string()
    } else {
        "cpu".to_string()
    }
}

impl NativeTensor for Tensor {
    fn backend_name(&self) -> &'static str {
        NAME
    }

    fn shape(&self) -> Vec<usize> {
        self.dims().to_vec()
    }

    fn dtype(&self) -> DType {
        match self.dtype() {
            CandleDType::U8 => DType::U8,
            CandleDType::U32 => DType::U32,
            CandleDType::I64 => DType::I64,
            CandleDType::BF16 => DType::BF16,
            CandleDType::F16 => DType::F16,
            CandleDType::F32 => DType::F32,
            CandleDType::F64 => DType::F64,
            #[allow(unreachable_patterns)]
            other => DType::Other(other.as_str()),
        }
    }

    fn device(&self) -> String {
        device_name(self.device())
    }

    fn is_trainable(&self) -> bool {
        self.is_variable()
    }

    fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError> {
        Ok(self.flatten_all()?.to_dtype(CandleDType::F64)?.to_vec1::<f64>()?)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

macro_rules! binary_kernel {
    ($op:literal, $method:ident) => {
        Kernel::new(|args, _| binary(args, $op, Tensor::$method))
    };
}

macro_rules! unary_kernel {
    ($op:literal, $method:ident) => {
        Kernel::new(|args, _| unary(args, $op, Tensor::$method))
    };
}

pub struct CandleBackend {
    device: Device,
    kernels: KernelTable,
}

impl CandleBackend {
    /// A backend that creates new arrays on `device`.
    pub fn new(device: Device) -> Self {
        let kernels = KernelTable::new()
            .with("add", binary_kernel!("add", broadcast_add))
            .with("subtract", binary_kernel!("subtract", broadcast_sub))
            .with("multiply", binary_kernel!("multiply", broadcast_mul))
            .with("divide", binary_kernel!("divide", broadcast_div))
            .with("negative", unary_kernel!("negative", neg))
            .with("abs", unary_kernel!("abs", abs))
            .with("exp", unary_kernel!("exp", exp))
            .with("log", unary_kernel!("log", log))
            .with("sqrt", unary_kernel!("sqrt", sqrt))
            .with("sum", Kernel::new(sum))
            .with("mean", Kernel::new(mean))
            .with("max", Kernel::new(|a, k| extremum(a, k, "max")))
            .with("min", Kernel::new(|a, k| extremum(a, k, "min")))
            .with("matmul", Kernel::new(matmul))
            .with("transpose", Kernel::new(transpose))
            .with("reshape", Kernel::new(reshape))
            .with("concat", Kernel::nested(concat));
        Self { device, kernels }
    }
}

impl Backend for CandleBackend {
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
        let tensor = as_tensor(x, "variable")?;
        Ok(NativeArray::new(Var::from_tensor(tensor)?.as_tensor().clone()))
    }

    fn from_f64(&self, data: &[f64], shape: &[usize]) -> Result<NativeArray, NativeError> {
        let tensor = Tensor::from_vec(data.to_vec(), shape.to_vec(), &self.device)?.to_dtype(CandleDType::F32)?;
        Ok(NativeArray::new(tensor))
    }

    fn default_device(&self) -> String {
        device_name(&self.device)
    }
}

fn as_tensor<'a>(x: &'a NativeArray, op: &str) -> Result<&'a Tensor, NativeError> {
    x.downcast_ref::<Tensor>()
        .ok_or_else(|| KernelError::boxed(format!("{op}: expected a candle tensor, got {x:?}")))
}

fn tensor_arg<'a>(args: &'a [Value], index: usize, op: &str) -> Result<&'a Tensor, NativeError> {
    match arg(args, index, op)? {
        Value::Native(n) => as_tensor(n, op),
        other => Err(KernelError::boxed(format!("{op}: argument {index} must be a tensor, got {}", other.kind()))),
    }
}

// A scalar as a rank-0 tensor matching `like`'s device and dtype
fn scalar_like(x: f64, like: &Tensor) -> candle_core::Result<Tensor> {
    Tensor::new(x, like.device())?.to_dtype(like.dtype())
}

fn wrap(tensor: Tensor) -> KernelResult {
    Ok(Value::Native(NativeArray::new(tensor)))
}

fn binary(args: &[Value], op: &str, f: BinaryOp) -> KernelResult {
    let lhs = arg(args, 0, op)?;
    let rhs = arg(args, 1, op)?;
    let out = match (lhs.as_f64(), rhs.as_f64()) {
        (Some(x), Some(y)) => f(&Tensor::new(x, &Device::Cpu)?, &Tensor::new(y, &Device::Cpu)?)?,
        (None, Some(y)) => {
            let a = tensor_arg(args, 0, op)?;
            f(a, &scalar_like(y, a)?)?
        }
        (Some(x), None) => {
            let b = tensor_arg(args, 1, op)?;
            f(&scalar_like(x, b)?, b)?
        }
        (None, None) => f(tensor_arg(args, 0, op)?, tensor_arg(args, 1, op)?)?,
    };
    wrap(out)
}

fn unary(args: &[Value], op: &str, f: UnaryOp) -> KernelResult {
    let input = arg(args, 0, op)?;
    match input.as_f64() {
        Some(x) => wrap(f(&Tensor::new(x, &Device::Cpu)?)?),
        None => wrap(f(tensor_arg(args, 0, op)?)?),
    }
}

fn sum(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let t = tensor_arg(args, 0, "sum")?;
    match axis_arg(args, kwargs, 1, t.rank(), "sum")? {
        Some(axis) => wrap(t.sum(axis)?),
        None => wrap(t.sum_all()?),
    }
}

fn mean(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let t = tensor_arg(args, 0, "mean")?;
    match axis_arg(args, kwargs, 1, t.rank(), "mean")? {
        Some(axis) => wrap(t.mean(axis)?),
        None => wrap(t.mean_all()?),
    }
}

fn extremum(args: &[Value], kwargs: &Kwargs, op: &str) -> KernelResult {
    let t = tensor_arg(args, 0, op)?;
    if t.elem_count() == 0 {
        return Err(KernelError::boxed(format!("{op}: zero-size array has no {op}")));
    }
    let (source, axis) = match axis_arg(args, kwargs, 1, t.rank(), op)? {
        Some(axis) => (t.clone(), axis),
        None => (t.flatten_all()?, 0),
    };
    match op {
        "max" => wrap(source.max(axis)?),
        _ => wrap(source.min(axis)?),
    }
}

fn matmul(args: &[Value], _kwargs: &Kwargs) -> KernelResult {
    wrap(tensor_arg(args, 0, "matmul")?.matmul(tensor_arg(args, 1, "matmul")?)?)
}

// Reverses all axes
fn transpose(args: &[Value], _kwargs: &Kwargs) -> KernelResult {
    let t = tensor_arg(args, 0, "transpose")?;
    match t.rank() {
        0 | 1 => wrap(t.clone()),
        2 => wrap(t.t()?),
        rank => wrap(t.permute((0..rank).rev().collect::<Vec<_>>())?),
    }
}

fn reshape(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let t = tensor_arg(args, 0, "reshape")?;
    let shape = shape_arg(args, kwargs, 1, t.elem_count(), "reshape")?;
    wrap(t.reshape(shape)?)
}

fn concat(args: &[Value], kwargs: &Kwargs) -> KernelResult {
    let items = arg(args, 0, "concat")?
        .as_sequence()
        .ok_or_else(|| KernelError::boxed("concat: expected a list of tensors"))?;
    let tensors = items
        .iter()
        .map(|item| match item {
            Value::Native(n) => as_tensor(n, "concat"),
            other => Err(KernelError::boxed(format!("concat: expected tensors, got {}", other.kind()))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let first = tensors
        .first()
        .ok_or_else(|| KernelError::boxed("concat: need at least one tensor"))?;
    let axis = axis_arg(&[], kwargs, 0, first.rank(), "concat")?.unwrap_or(0);
    wrap(Tensor::cat(&tensors, axis)?)
}
