use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::backend::KernelTable;
use crate::error::{Error, NativeError, Result};
use crate::value::NativeArray;

/// A group of operations a backend can declare as a unit.
///
/// Declaring a family is a promise to provide every op it lists; the promise
/// is checked when the backend is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpFamily {
    Elementwise,
    Reduction,
    LinearAlgebra,
    Manipulation,
}

impl OpFamily {
    pub const ALL: [OpFamily; 4] = [
        OpFamily::Elementwise,
        OpFamily::Reduction,
        OpFamily::LinearAlgebra,
        OpFamily::Manipulation,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            OpFamily::Elementwise => "elementwise",
            OpFamily::Reduction => "reduction",
            OpFamily::LinearAlgebra => "linear-algebra",
            OpFamily::Manipulation => "manipulation",
        }
    }

    /// Operation names the family requires.
    pub const fn ops(self) -> &'static [&'static str] {
        match self {
            OpFamily::Elementwise => &[
                "add", "subtract", "multiply", "divide", "negative", "abs", "exp", "log", "sqrt",
            ],
            OpFamily::Reduction => &["sum", "mean", "max", "min"],
            OpFamily::LinearAlgebra => &["matmul", "transpose"],
            OpFamily::Manipulation => &["reshape", "concat"],
        }
    }
}

impl fmt::Display for OpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The trait an array library is adapted through.
///
/// # Implementation Notes
///
/// - `is_native` and `is_variable` are pure queries and must never fail.
/// - The default `is_native` compares [`NativeArray::backend_name`] with
///   [`name`](Backend::name); override it when several backends share a name
///   (generic backends do).
/// - Kernels receive native values only; wrappers are unwrapped before the call.
pub trait Backend: Send + Sync + 'static {
    /// Unique name the backend is registered and looked up under.
    fn name(&self) -> &'static str;

    /// Op families this backend claims to cover completely.
    fn families(&self) -> &[OpFamily];

    fn kernels(&self) -> &KernelTable;

    /// Whether `x` is one of this backend's arrays.
    fn is_native(&self, x: &NativeArray) -> bool {
        x.backend_name() == self.name()
    }

    /// Whether `x` is one of this backend's trainable arrays.
    ///
    /// With `exclusive`, arrays that also count as plain arrays are excluded.
    fn is_variable(&self, x: &NativeArray, exclusive: bool) -> bool {
        self.is_native(x) && x.is_trainable() && (!exclusive || !x.is_plain())
    }

    /// A trainable copy of `x`.
    fn variable(&self, x: &NativeArray) -> std::result::Result<NativeArray, NativeError>;

    /// A new array from row-major data.
    fn from_f64(&self, data: &[f64], shape: &[usize]) -> std::result::Result<NativeArray, NativeError>;

    fn default_device(&self) -> String {
        "cpu".to_string()
    }
}

/// A shared, cheaply cloned reference to a registered backend.
#[derive(Clone)]
pub struct BackendHandle(Arc<dyn Backend>);

impl BackendHandle {
    pub fn new<B: Backend>(backend: B) -> Self {
        Self(Arc::new(backend))
    }

    /// Verify every op of every declared family has a kernel.
    pub fn check_capabilities(&self) -> Result<()> {
        for family in self.families() {
            for &op in family.ops() {
                if !self.kernels().contains(op) {
                    return Err(Error::MissingCapability {
                        backend: self.name().to_string(),
                        family: family.name(),
                        op,
                    });
                }
            }
        }
        Ok(())
    }

    /// Whether every op of `family` is declared.
    pub fn supports(&self, family: OpFamily) -> bool {
        self.families().contains(&family)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for BackendHandle {
    type Target = dyn Backend;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for BackendHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BackendHandle").field(&self.name()).finish()
    }
}

impl fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Kernel;
    use crate::value::Value;

    struct Partial {
        kernels: KernelTable,
    }

    impl Backend for Partial {
        fn name(&self) -> &'static str {
            "partial"
        }

        fn families(&self) -> &[OpFamily] {
            &[OpFamily::LinearAlgebra]
        }

        fn kernels(&self) -> &KernelTable {
            &self.kernels
        }

        fn variable(&self, x: &NativeArray) -> std::result::Result<NativeArray, NativeError> {
            Ok(x.clone())
        }

        fn from_f64(&self, _data: &[f64], _shape: &[usize]) -> std::result::Result<NativeArray, NativeError> {
            Err("unsupported".into())
        }
    }

    #[test]
    fn test_missing_family_op_is_reported() {
        // declares linear algebra but only provides matmul
        let kernels = KernelTable::new().with("matmul", Kernel::new(|_, _| Ok(Value::None)));
        let handle = BackendHandle::new(Partial { kernels });

        let err = handle.check_capabilities().unwrap_err();
        match err {
            Error::MissingCapability { backend, family, op } => {
                assert_eq!(backend, "partial");
                assert_eq!(family, "linear-algebra");
                assert_eq!(op, "transpose");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_complete_family_passes() {
        let kernels = KernelTable::new()
            .with("matmul", Kernel::new(|_, _| Ok(Value::None)))
            .with("transpose", Kernel::new(|_, _| Ok(Value::None)));
        let handle = BackendHandle::new(Partial { kernels });
        assert!(handle.check_capabilities().is_ok());
        assert!(handle.supports(OpFamily::LinearAlgebra));
        assert!(!handle.supports(OpFamily::Reduction));
    }

    #[test]
    fn test_families_list_distinct_ops() {
        let mut seen = std::collections::HashSet::new();
        for family in OpFamily::ALL {
            for op in family.ops() {
                assert!(seen.insert(*op), "{op} listed twice");
            }
        }
    }
}
