//! Wrapper types around native arrays.
//!
//! An [`Array`] owns a [`NativeArray`] and caches its shape, dtype, device and
//! owning backend at construction. [`Array::set_data`] is the only way to swap
//! the data, and it recomputes the cache, so the cached attributes always
//! describe the current data.
//!
//! A [`Variable`] is an [`Array`] whose data participates in gradient tracking.

use std::fmt;
use std::ops::Deref;

use crate::backend::BackendHandle;
use crate::classify;
use crate::context;
use crate::error::{Error, Result};
use crate::value::{DType, NativeArray, Value};

#[derive(Clone, Debug)]
pub struct Array {
    data: NativeArray,
    shape: Vec<usize>,
    dtype: DType,
    device: String,
    backend: &'static str,
}

impl Array {
    /// Wrap a native array of a known backend.
    ///
    /// Fails with [`Error::NotNativeArray`] when no registered backend (nor the
    /// current one) claims `data`. Building a wrapper turns wrapped mode on for
    /// the current context unless implicit enabling is switched off.
    pub fn new(data: NativeArray) -> Result<Self> {
        let array = Self::checked(data)?;
        context::note_wrapper_constructed();
        Ok(array)
    }

    fn checked(data: NativeArray) -> Result<Self> {
        if !classify::is_native_array(&Value::Native(data.clone()), None) {
            return Err(Error::NotNativeArray(format!("{data:?}")));
        }
        Ok(Self::from_native(data))
    }

    /// Wrap without classification; callers have already established ownership.
    pub(crate) fn from_native(data: NativeArray) -> Self {
        Self {
            shape: data.shape(),
            dtype: data.dtype(),
            device: data.device(),
            backend: data.backend_name(),
            data,
        }
    }

    pub(crate) fn from_backend(data: NativeArray, backend: &BackendHandle) -> Self {
        let mut array = Self::from_native(data);
        array.backend = backend.name();
        array
    }

    pub fn data(&self) -> &NativeArray {
        &self.data
    }

    pub fn into_native(self) -> NativeArray {
        self.data
    }

    /// Replace the wrapped data, revalidating it and refreshing every cached attribute.
    pub fn set_data(&mut self, data: NativeArray) -> Result<()> {
        *self = Self::checked(data)?;
        Ok(())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend
    }

    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        self.data.to_f64_vec().map_err(Error::Native)
    }
}

impl PartialEq for Array {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.to_f64_vec() {
            Ok(values) => write!(f, "arbor.array({values:?}")?,
            Err(_) => f.write_str("arbor.array(<unreadable>")?,
        }
        if self.shape.len() != 1 {
            write!(f, ", shape={:?}", self.shape)?;
        }
        if self.device != "cpu" {
            write!(f, ", dev={}", self.device)?;
        }
        f.write_str(")")
    }
}

/// An [`Array`] whose data is trainable.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable(Array);

impl Variable {
    /// Wrap a trainable native array.
    ///
    /// Fails with [`Error::NotVariable`] when the owning backend does not
    /// report `data` as a variable.
    pub fn new(data: NativeArray) -> Result<Self> {
        if !classify::is_variable(&Value::Native(data.clone()), false, None) {
            return Err(Error::NotVariable(format!("{data:?}")));
        }
        let array = Array::from_native(data);
        context::note_wrapper_constructed();
        Ok(Self(array))
    }

    pub(crate) fn from_array(array: Array) -> Self {
        Self(array)
    }

    pub fn into_array(self) -> Array {
        self.0
    }

    pub fn into_native(self) -> NativeArray {
        self.0.into_native()
    }
}

impl Deref for Variable {
    type Target = Array;

    fn deref(&self) -> &Array {
        &self.0
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "variable({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ndarray::{NdVariable, ndarray_from};
    use crate::context::{Context, enter, wrapped_mode};
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn test_new_caches_attributes() {
        enter(Context::new(), || {
            let array = Array::new(ndarray_from(&[1.0, 2.0, 3.0, 4.0], &[2, 2])).unwrap();
            assert_eq!(array.shape(), &[2, 2]);
            assert_eq!(array.dtype(), DType::F64);
            assert_eq!(array.device(), "cpu");
            assert_eq!(array.backend_name(), "ndarray");
            assert_eq!(array.size(), 4);
        });
    }

    #[test]
    fn test_new_enables_wrapped_mode() {
        enter(Context::new(), || {
            assert!(!wrapped_mode());
            Array::new(ndarray_from(&[1.0], &[1])).unwrap();
            assert!(wrapped_mode());
        });
    }

    #[test]
    fn test_set_data_refreshes_cache() {
        enter(Context::new(), || {
            let mut array = Array::new(ndarray_from(&[1.0, 2.0], &[2])).unwrap();
            array.set_data(ndarray_from(&[0.0; 6], &[2, 3])).unwrap();
            assert_eq!(array.shape(), &[2, 3]);
            assert_eq!(array.to_f64_vec().unwrap(), vec![0.0; 6]);
        });
    }

    #[test]
    fn test_unknown_native_is_rejected() {
        #[derive(Debug)]
        struct Stranger;

        impl crate::value::NativeTensor for Stranger {
            fn backend_name(&self) -> &'static str {
                "stranger"
            }
            fn shape(&self) -> Vec<usize> {
                vec![]
            }
            fn dtype(&self) -> DType {
                DType::F32
            }
            fn device(&self) -> String {
                "cpu".into()
            }
            fn to_f64_vec(&self) -> std::result::Result<Vec<f64>, crate::error::NativeError> {
                Ok(vec![])
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        enter(Context::new(), || {
            let err = Array::new(NativeArray::new(Stranger)).unwrap_err();
            assert!(matches!(err, Error::NotNativeArray(_)));
        });
    }

    #[test]
    fn test_variable_requires_trainable_data() {
        enter(Context::new(), || {
            let plain = ndarray_from(&[1.0], &[1]);
            assert!(matches!(Variable::new(plain), Err(Error::NotVariable(_))));

            let data = ArrayD::from_shape_vec(IxDyn(&[1]), vec![1.0]).unwrap();
            let var = Variable::new(NativeArray::new(NdVariable::new(data))).unwrap();
            assert_eq!(var.shape(), &[1]);
            assert_eq!(var.to_string(), "variable(arbor.array([1.0]))");
        });
    }

    #[test]
    fn test_display() {
        enter(Context::new(), || {
            let array = Array::new(ndarray_from(&[1.0, 2.0], &[2])).unwrap();
            assert_eq!(array.to_string(), "arbor.array([1.0, 2.0])");
            let matrix = Array::new(ndarray_from(&[1.0, 2.0], &[1, 2])).unwrap();
            assert_eq!(matrix.to_string(), "arbor.array([1.0, 2.0], shape=[1, 2])");
        });
    }
}
