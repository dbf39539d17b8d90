use std::any::Any;
use std::fmt;

use crate::backend::{Backend, Kernel, KernelError, KernelResult, KernelTable, OpFamily, arg};
use crate::error::NativeError;
use crate::value::{DType, Kwargs, NativeArray, NativeTensor, Value};

// A simple mock tensor for testing: every element holds the same value
#[derive(Clone, Debug, PartialEq)]
pub struct MockTensor {
    pub(crate) shape: Vec<usize>,
    pub(crate) value: f64,
    pub(crate) trainable: bool,
}

impl MockTensor {
    pub fn new(shape: Vec<usize>, value: f64) -> Self {
        Self {
            shape,
            value,
            trainable: false,
        }
    }
}

impl fmt::Display for MockTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockTensor({:?}, {})", self.shape, self.value)
    }
}

impl NativeTensor for MockTensor {
    fn backend_name(&self) -> &'static str {
        "mock"
    }

    fn shape(&self) -> Vec<usize> {
        self.shape.clone()
    }

    fn dtype(&self) -> DType {
        DType::F32
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }

    // mock variables also count as plain arrays
    fn is_trainable(&self) -> bool {
        self.trainable
    }

    fn is_plain(&self) -> bool {
        true
    }

    fn to_f64_vec(&self) -> Result<Vec<f64>, NativeError> {
        Ok(vec![self.value; self.shape.iter().product()])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn mock_array(shape: Vec<usize>, value: f64) -> Value {
    Value::Native(NativeArray::new(MockTensor::new(shape, value)))
}

fn mock_of<'a>(v: &'a Value, op: &str) -> Result<&'a MockTensor, NativeError> {
    match v {
        Value::Native(n) => n
            .downcast_ref::<MockTensor>()
            .ok_or_else(|| KernelError::boxed(format!("{op}: not a mock tensor"))),
        other => Err(KernelError::boxed(format!("{op}: unsupported operand {}", other.kind()))),
    }
}

// Scalars combine with the constant; tensors must agree in shape
fn combine(args: &[Value], op: &str, f: fn(f64, f64) -> f64) -> KernelResult {
    let lhs = mock_of(arg(args, 0, op)?, op)?;
    let rhs = arg(args, 1, op)?;
    let (shape, value) = match rhs.as_f64() {
        Some(s) => (lhs.shape.clone(), f(lhs.value, s)),
        None => {
            let rhs = mock_of(rhs, op)?;
            if rhs.shape != lhs.shape {
                return Err(KernelError::boxed(format!("{op}: shape {:?} vs {:?}", lhs.shape, rhs.shape)));
            }
            (lhs.shape.clone(), f(lhs.value, rhs.value))
        }
    };
    Ok(Value::Native(NativeArray::new(MockTensor::new(shape, value))))
}

/// Backend named `mock`; declares no families, provides `add`, `multiply`
/// and a `fail` kernel that always errors.
pub struct MockBackend {
    kernels: KernelTable,
}

impl MockBackend {
    pub fn new() -> Self {
        let kernels = KernelTable::new()
            .with("add", Kernel::new(|a, _| combine(a, "add", |x, y| x + y)))
            .with("multiply", Kernel::new(|a, _| combine(a, "multiply", |x, y| x * y)))
            .with(
                "fail",
                Kernel::new(|_: &[Value], _: &Kwargs| Err(KernelError::boxed("mock failure"))),
            );
        Self { kernels }
    }
}

impl Backend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn families(&self) -> &[OpFamily] {
        &[]
    }

    fn kernels(&self) -> &KernelTable {
        &self.kernels
    }

    fn variable(&self, x: &NativeArray) -> Result<NativeArray, NativeError> {
        let mut tensor = x
            .downcast_ref::<MockTensor>()
            .cloned()
            .ok_or_else(|| KernelError::boxed("variable: not a mock tensor"))?;
        tensor.trainable = true;
        Ok(NativeArray::new(tensor))
    }

    fn from_f64(&self, data: &[f64], shape: &[usize]) -> Result<NativeArray, NativeError> {
        let value = data.first().copied().unwrap_or(0.0);
        Ok(NativeArray::new(MockTensor::new(shape.to_vec(), value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_add() {
        let backend = MockBackend::new();
        let out = backend
            .kernels()
            .get("add")
            .unwrap()
            .call(&[mock_array(vec![2, 3], 1.0), Value::Int(2)], &Kwargs::new())
            .unwrap();
        let tensor = out.as_native().unwrap().downcast_ref::<MockTensor>().unwrap().clone();
        assert_eq!(tensor, MockTensor::new(vec![2, 3], 3.0));
    }

    #[test]
    fn test_mock_variables_are_not_exclusive() {
        let backend = MockBackend::new();
        let x = mock_array(vec![1], 1.0);
        let var = backend.variable(x.as_native().unwrap()).unwrap();
        assert!(backend.is_variable(&var, false));
        assert!(!backend.is_variable(&var, true));
    }
}
