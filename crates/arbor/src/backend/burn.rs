//! The burn implementation for backend provision.
//! Since burn tensors are constrained with const generic ranks, arrays are
//! carried as [`BurnArray`] and every operation is macro applied per rank.
//! Ranks 1 to 4 of float tensors are supported.

use std::any::{Any, TypeId};
use std::marker::PhantomData;

use ::burn::prelude::{Backend as BurnBackendOps, Tensor};
use ::burn::tensor::TensorData;

use crate::backend::{Backend, Kernel, KernelError, KernelResult, KernelTable, OpFamily, arg};
use crate::error::NativeError;
use crate::value::{DType, Kwargs, NativeArray, NativeTensor, Value};

pub const NAME: &str = "burn";

/// A float burn tensor of rank 1 to 4.
#[derive(Clone, Debug)]
pub enum BurnArray<B: BurnBackendOps> {
    R1(Tensor<B, 1>),
    R2(Tensor<B, 2>),
    R3(Tensor<B, 3>),
    R4(Tensor<B, 4>),
}

macro_rules! each_rank {
    ($array:expr, $t:ident => $body:expr) => {
        match $array {
            BurnArray::R1($t) => $body,
            BurnArray::R2($t) => $body,
            BurnArray::R3($t) => $body,
            BurnArray::R4($t) => $body,
        }
    };
}

macro_rules! map_rank {
    ($array:expr, $t:ident => $body:expr) => {
        match $array {
            BurnArray::R1($t) => BurnArray::R1($body),
            BurnArray::R2($t) => BurnArray::R2($body),
            BurnArray::R3($t) => BurnArray::R3($body),
            BurnArray::R4($t) => BurnArray::R4($body),
        }
    };
}

macro_rules! zip_rank {
    ($a:expr, $b:expr, $x:ident, $y:ident => $body:expr) => {
        match ($a, $b) {
            (BurnArray::R1($x), BurnArray::R1($y)) => Some(BurnArray::R1($body)),
            (BurnArray::R2($x), BurnArray::R2($y)) => Some(BurnArray::R2($body)),
            (BurnArray::R3($x), BurnArray::R3($y)) => Some(BurnArray::R3($body)),
            (BurnArray::R4($x), BurnArray::R4($y)) => Some(BurnArray::R4($body)),
            _ => None,
        }
    };
}

impl<B: BurnBackendOps> BurnArray<B> {
    pub fn rank(&self) -> usize {
        match self {
            BurnArray::R1(_) => 1,
            BurnArray::R2(_) => 2,
            BurnArray::R3(_) => 3,
            BurnArray::R4(_) => 4,
        }
    }

    fn from_data(data: TensorData, device: &B::Device) -> Result<Self, NativeError> {
        Ok(match data.shape.len() {
            1 => BurnArray::R1(Tensor::from_data(data, device)),
            2 => BurnArray::R2(Tensor::from_data(data, device)),
            3 => BurnArray::R3(Tensor::from_data(data, device)),
            4 => BurnArray::R4(Tensor::from_data(data, device)),
            rank => return Err(KernelError::boxed(format!("burn arrays must have rank 1 to 4, got {rank}"))),
        })
    }
}

impl<B: BurnBackendOps> NativeTensor for BurnArray<B> {
    fn backend_name(&self) -> &'static str {
        NAME
    }

    fn shape(&self) -> Vec<usize> {
        each_rank!(self, t => t.dims().to_vec())
    }

    fn dtype(&self) -> DType {
        let elem = TypeId::of::<B::FloatElem>();
        if elem == TypeId::of::<f32>() {
            DType::F32
        } else if elem == TypeId::of::<f64>() {
            DType::F64
        } else {
            DType::Other(std::any::type_name::<B::FloatElem>())
        }
    }

    fn device(&self) -> String {
        let device = each_rank!(self, t => t.device());
        format!("{device:?}").to_lowercase()
    }

    fn is_trainable(&self) -> bool {
        each_rank!(self, t => t.is_require_grad())
    }

    fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError> {
        let data = each_rank!(self, t => t.to_data());
        Ok(data.iter::<f64>().collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "subtract",
            BinOp::Mul => "multiply",
            BinOp::Div => "divide",
        }
    }

    fn scalar(self, x: f64, y: f64) -> f64 {
        match self {
            BinOp::Add => x + y,
            BinOp::Sub => x - y,
            BinOp::Mul => x * y,
            BinOp::Div => x / y,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum UnOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
}

#[derive(Debug, Clone, Copy)]
enum Reduce {
    Sum,
    Mean,
    Max,
    Min,
}

pub struct BurnBackend<B: BurnBackendOps> {
    device: B::Device,
    kernels: KernelTable,
    _backend: PhantomData<B>,
}

/// Burn on its ndarray CPU backend.
pub type NdArrayBurnBackend = BurnBackend<::burn::backend::NdArray>;

impl<B: BurnBackendOps> BurnBackend<B> {
    /// A backend that creates new arrays on `device`.
    pub fn new(device: B::Device) -> Self {
        let kernels = KernelTable::new()
            .with("add", Kernel::new(|a, _| binary::<B>(a, BinOp::Add)))
            .with("subtract", Kernel::new(|a, _| binary::<B>(a, BinOp::Sub)))
            .with("multiply", Kernel::new(|a, _| binary::<B>(a, BinOp::Mul)))
            .with("divide", Kernel::new(|a, _| binary::<B>(a, BinOp::Div)))
            .with("negative", Kernel::new(|a, _| unary::<B>(a, "negative", UnOp::Neg)))
            .with("abs", Kernel::new(|a, _| unary::<B>(a, "abs", UnOp::Abs)))
            .with("exp", Kernel::new(|a, _| unary::<B>(a, "exp", UnOp::Exp)))
            .with("log", Kernel::new(|a, _| unary::<B>(a, "log", UnOp::Log)))
            .with("sqrt", Kernel::new(|a, _| unary::<B>(a, "sqrt", UnOp::Sqrt)))
            .with("sum", Kernel::new(|a, k| reduce::<B>(a, k, "sum", Reduce::Sum)))
            .with("mean", Kernel::new(|a, k| reduce::<B>(a, k, "mean", Reduce::Mean)))
            .with("max", Kernel::new(|a, k| reduce::<B>(a, k, "max", Reduce::Max)))
            .with("min", Kernel::new(|a, k| reduce::<B>(a, k, "min", Reduce::Min)))
            .with("matmul", Kernel::new(|a, _| matmul::<B>(a)))
            .with("transpose", Kernel::new(|a, _| transpose::<B>(a)));
        Self {
            device,
            kernels,
            _backend: PhantomData,
        }
    }
}

impl<B: BurnBackendOps> Default for BurnBackend<B> {
    fn default() -> Self {
        Self::new(B::Device::default())
    }
}

impl<B: BurnBackendOps> Backend for BurnBackend<B> {
    fn name(&self) -> &'static str {
        NAME
    }

    // reshape and concat change the rank, which burn fixes at compile time
    fn families(&self) -> &[OpFamily] {
        &[OpFamily::Elementwise, OpFamily::Reduction, OpFamily::LinearAlgebra]
    }

    fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    fn is_native(&self, x: &NativeArray) -> bool {
        x.downcast_ref::<BurnArray<B>>().is_some()
    }

    fn variable(&self, x: &NativeArray) -> Result<NativeArray, NativeError> {
        let array = as_burn::<B>(x, "variable")?;
        let tracked = map_rank!(array.clone(), t => t.set_require_grad(true));
        if !tracked.is_trainable() {
            return Err(KernelError::boxed("variable: this burn backend does not track gradients"));
        }
        Ok(NativeArray::new(tracked))
    }

    fn from_f64(&self, data: &[f64], shape: &[usize]) -> Result<NativeArray, NativeError> {
        if shape.iter().product::<usize>() != data.len() {
            return Err(KernelError::boxed(format!("{} values do not fit shape {shape:?}", data.len())));
        }
        let values: Vec<f32> = data.iter().map(|&x| x as f32).collect();
        let array = BurnArray::<B>::from_data(TensorData::new(values, shape.to_vec()), &self.device)?;
        Ok(NativeArray::new(array))
    }

    fn default_device(&self) -> String {
        format!("{:?}", self.device).to_lowercase()
    }
}

fn as_burn<'a, B: BurnBackendOps>(x: &'a NativeArray, op: &str) -> Result<&'a BurnArray<B>, NativeError> {
    x.downcast_ref::<BurnArray<B>>()
        .ok_or_else(|| KernelError::boxed(format!("{op}: expected a burn tensor, got {x:?}")))
}

enum Operand<B: BurnBackendOps> {
    Array(BurnArray<B>),
    Scalar(f64),
}

fn operand<B: BurnBackendOps>(value: &Value, op: &str) -> Result<Operand<B>, NativeError> {
    match value {
        Value::Native(n) => as_burn::<B>(n, op).map(|a| Operand::Array(a.clone())),
        other => other
            .as_f64()
            .map(Operand::Scalar)
            .ok_or_else(|| KernelError::boxed(format!("{op}: unsupported operand {}", other.kind()))),
    }
}

fn wrap<B: BurnBackendOps>(array: BurnArray<B>) -> KernelResult {
    Ok(Value::Native(NativeArray::new(array)))
}

fn scalar<B: BurnBackendOps>(x: f64) -> KernelResult {
    let data = TensorData::new(vec![x as f32], vec![1]);
    wrap::<B>(BurnArray::R1(Tensor::from_data(data, &B::Device::default())))
}

fn binary<B: BurnBackendOps>(args: &[Value], op: BinOp) -> KernelResult {
    let name = op.name();
    let lhs = operand::<B>(arg(args, 0, name)?, name)?;
    let rhs = operand::<B>(arg(args, 1, name)?, name)?;
    match (lhs, rhs) {
        (Operand::Scalar(x), Operand::Scalar(y)) => scalar::<B>(op.scalar(x, y)),
        (Operand::Array(a), Operand::Scalar(s)) => wrap(map_rank!(a, t => match op {
            BinOp::Add => t.add_scalar(s),
            BinOp::Sub => t.sub_scalar(s),
            BinOp::Mul => t.mul_scalar(s),
            BinOp::Div => t.div_scalar(s),
        })),
        (Operand::Scalar(s), Operand::Array(b)) => wrap(map_rank!(b, t => match op {
            BinOp::Add => t.add_scalar(s),
            BinOp::Sub => t.neg().add_scalar(s),
            BinOp::Mul => t.mul_scalar(s),
            BinOp::Div => t.recip().mul_scalar(s),
        })),
        (Operand::Array(a), Operand::Array(b)) => {
            let (lrank, rrank) = (a.rank(), b.rank());
            let out = zip_rank!(a, b, x, y => match op {
                BinOp::Add => x.add(y),
                BinOp::Sub => x.sub(y),
                BinOp::Mul => x.mul(y),
                BinOp::Div => x.div(y),
            });
            out.map_or_else(
                || Err(KernelError::boxed(format!("{name}: rank {lrank} and rank {rrank} tensors do not match"))),
                wrap,
            )
        }
    }
}

fn unary<B: BurnBackendOps>(args: &[Value], name: &str, op: UnOp) -> KernelResult {
    match operand::<B>(arg(args, 0, name)?, name)? {
        Operand::Scalar(x) => scalar::<B>(match op {
            UnOp::Neg => -x,
            UnOp::Abs => x.abs(),
            UnOp::Exp => x.exp(),
            UnOp::Log => x.ln(),
            UnOp::Sqrt => x.sqrt(),
        }),
        Operand::Array(a) => wrap(map_rank!(a, t => match op {
            UnOp::Neg => t.neg(),
            UnOp::Abs => t.abs(),
            UnOp::Exp => t.exp(),
            UnOp::Log => t.log(),
            UnOp::Sqrt => t.sqrt(),
        })),
    }
}

fn reduce<B: BurnBackendOps>(args: &[Value], kwargs: &Kwargs, name: &str, op: Reduce) -> KernelResult {
    if kwargs.get("axis").is_some_and(|a| !a.is_none()) {
        return Err(KernelError::boxed(format!("{name}: reducing along an axis is not supported by burn")));
    }
    let a = match operand::<B>(arg(args, 0, name)?, name)? {
        Operand::Array(a) => a,
        Operand::Scalar(_) => return Err(KernelError::boxed(format!("{name}: expected a tensor"))),
    };
    if a.shape().contains(&0) {
        return Err(KernelError::boxed(format!("{name}: zero-size array")));
    }
    wrap(BurnArray::R1(each_rank!(a, t => match op {
        Reduce::Sum => t.sum(),
        Reduce::Mean => t.mean(),
        Reduce::Max => t.max(),
        Reduce::Min => t.min(),
    })))
}

fn matmul<B: BurnBackendOps>(args: &[Value]) -> KernelResult {
    let a = as_burn::<B>(crate::backend::native_arg(args, 0, "matmul")?, "matmul")?.clone();
    let b = as_burn::<B>(crate::backend::native_arg(args, 1, "matmul")?, "matmul")?.clone();
    let out = match (a, b) {
        (BurnArray::R2(x), BurnArray::R2(y)) => BurnArray::R2(x.matmul(y)),
        (BurnArray::R3(x), BurnArray::R3(y)) => BurnArray::R3(x.matmul(y)),
        (BurnArray::R4(x), BurnArray::R4(y)) => BurnArray::R4(x.matmul(y)),
        (x, y) => {
            return Err(KernelError::boxed(format!(
                "matmul: expected two tensors of equal rank 2 to 4, got {:?} and {:?}",
                x.shape(),
                y.shape()
            )));
        }
    };
    wrap(out)
}

// Swaps the last two axes
fn transpose<B: BurnBackendOps>(args: &[Value]) -> KernelResult {
    let a = as_burn::<B>(crate::backend::native_arg(args, 0, "transpose")?, "transpose")?.clone();
    wrap(match a {
        BurnArray::R1(t) => BurnArray::R1(t),
        BurnArray::R2(t) => BurnArray::R2(t.transpose()),
        BurnArray::R3(t) => BurnArray::R3(t.transpose()),
        BurnArray::R4(t) => BurnArray::R4(t.transpose()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> NdArrayBurnBackend {
        NdArrayBurnBackend::default()
    }

    fn tensor(data: &[f64], shape: &[usize]) -> Value {
        Value::Native(backend().from_f64(data, shape).unwrap())
    }

    fn call(op: &str, args: &[Value]) -> Vec<f64> {
        backend()
            .kernels()
            .get(op)
            .unwrap()
            .call(args, &Kwargs::new())
            .unwrap()
            .as_native()
            .unwrap()
            .to_f64_vec()
            .unwrap()
    }

    #[test]
    fn test_declared_families_are_complete() {
        assert!(crate::backend::BackendHandle::new(backend()).check_capabilities().is_ok());
    }

    #[test]
    fn test_attributes() {
        let x = tensor(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let native = x.as_native().unwrap();
        assert_eq!(native.backend_name(), "burn");
        assert_eq!(native.shape(), vec![2, 3]);
        assert_eq!(native.dtype(), DType::F32);
        assert!(!native.is_trainable());
    }

    #[test]
    fn test_elementwise_and_reductions() {
        let x = tensor(&[1.0, 2.0, 3.0], &[3]);
        assert_eq!(call("add", &[x.clone(), Value::Int(1)]), vec![2.0, 3.0, 4.0]);
        assert_eq!(call("subtract", &[Value::Int(10), x.clone()]), vec![9.0, 8.0, 7.0]);
        assert_eq!(call("sum", &[x.clone()]), vec![6.0]);
        assert_eq!(call("max", &[x]), vec![3.0]);
    }

    #[test]
    fn test_rank_mismatch_is_an_error() {
        let result = backend()
            .kernels()
            .get("add")
            .unwrap()
            .call(&[tensor(&[1.0], &[1]), tensor(&[1.0], &[1, 1])], &Kwargs::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_rank_zero_is_rejected() {
        assert!(backend().from_f64(&[1.0], &[]).is_err());
    }

    #[test]
    fn test_plain_backend_has_no_variables() {
        let backend = backend();
        let x = backend.from_f64(&[1.0], &[1]).unwrap();
        assert!(backend.variable(&x).is_err());
    }
}
