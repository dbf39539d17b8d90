//! Predicates over values.
//!
//! The `try_` forms tell "definitely not" (`Ok(false)`) apart from "no backend
//! could be resolved to ask" (`Err`). The plain forms fold the latter into
//! `false` and never fail.

use crate::backend::{BackendHandle, resolve_native};
use crate::error::Result;
use crate::value::{NativeArray, Value};

fn backend_for(x: &NativeArray, backend: Option<&BackendHandle>) -> Result<BackendHandle> {
    match backend {
        Some(handle) => Ok(handle.clone()),
        None => resolve_native(x),
    }
}

/// Whether `x` is a native array of `backend`, or of the backend resolved for it.
pub fn try_is_native_array(x: &Value, backend: Option<&BackendHandle>) -> Result<bool> {
    match x {
        Value::Native(n) => Ok(backend_for(n, backend)?.is_native(n)),
        _ => Ok(false),
    }
}

pub fn is_native_array(x: &Value, backend: Option<&BackendHandle>) -> bool {
    try_is_native_array(x, backend).unwrap_or(false)
}

/// Whether `x` is a trainable native array.
///
/// With `exclusive`, arrays that also count as plain arrays are excluded.
pub fn try_is_variable(x: &Value, exclusive: bool, backend: Option<&BackendHandle>) -> Result<bool> {
    match x {
        Value::Native(n) => Ok(backend_for(n, backend)?.is_variable(n, exclusive)),
        _ => Ok(false),
    }
}

pub fn is_variable(x: &Value, exclusive: bool, backend: Option<&BackendHandle>) -> bool {
    try_is_variable(x, exclusive, backend).unwrap_or(false)
}

/// Whether `x` is an [`Array`](crate::Array) or [`Variable`](crate::Variable).
pub fn is_wrapper(x: &Value) -> bool {
    matches!(x, Value::Array(_) | Value::Variable(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::array::Array;
    use crate::backend::mock_tensor::{MockBackend, mock_array};
    use crate::backend::ndarray::{NdVariable, ndarray_from};
    use crate::backend::{get_backend, register_backend};
    use crate::context::{Context, enter};
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_native_arrays() {
        enter(Context::new(), || {
            let x = Value::Native(ndarray_from(&[1.0], &[1]));
            assert!(is_native_array(&x, None));
            assert!(!is_native_array(&Value::Int(1), None));
            assert!(!is_wrapper(&x));
        });
    }

    #[test]
    fn test_explicit_backend_is_asked() {
        register_backend(BackendHandle::new(MockBackend::new())).unwrap();
        let mock = get_backend("mock").unwrap();
        let x = Value::Native(ndarray_from(&[1.0], &[1]));
        assert!(!is_native_array(&x, Some(&mock)));
        assert!(is_native_array(&mock_array(vec![1], 1.0), Some(&mock)));
    }

    #[test]
    fn test_unresolvable_is_an_error_or_false() {
        #[derive(Debug)]
        struct Orphan;
        impl crate::value::NativeTensor for Orphan {
            fn backend_name(&self) -> &'static str {
                "orphan"
            }
            fn shape(&self) -> Vec<usize> {
                vec![1]
            }
            fn dtype(&self) -> crate::DType {
                crate::DType::F32
            }
            fn device(&self) -> String {
                "cpu".into()
            }
            fn to_f64_vec(&self) -> std::result::Result<Vec<f64>, crate::error::NativeError> {
                Ok(vec![0.0])
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        enter(Context::new(), || {
            let x = Value::Native(NativeArray::new(Orphan));
            assert!(matches!(try_is_native_array(&x, None), Err(Error::NoBackendFound)));
            assert!(!is_native_array(&x, None));
            assert!(!is_variable(&x, false, None));
        });
    }

    #[test]
    fn test_variables() {
        enter(Context::new(), || {
            let data = ArrayD::from_shape_vec(IxDyn(&[1]), vec![1.0]).unwrap();
            let var = Value::Native(NativeArray::new(NdVariable::new(data)));
            assert!(is_variable(&var, false, None));
            assert!(is_variable(&var, true, None));
            assert!(!is_variable(&Value::Native(ndarray_from(&[1.0], &[1])), false, None));
        });
    }

    #[test]
    fn test_wrappers() {
        enter(Context::new(), || {
            let array = Array::new(ndarray_from(&[1.0], &[1])).unwrap();
            let wrapped = Value::Array(array);
            assert!(is_wrapper(&wrapped));
            assert!(!is_native_array(&wrapped, None));
        });
    }
}
