//! # Errors
//!
//! Every failure the core can surface, in one enum.
//!
//! Backend failures are normalized into [`Error::Backend`], which records the
//! operation name, the backend that serviced it, a human readable message and
//! the backend's own error as the chained [`source`](std::error::Error::source).
//! Nothing here is retried; programmer errors (bad key-chains, absent
//! operations) and legitimate backend failures are both returned to the caller.

use crate::context::TraceMode;
use std::error::Error as StdError;

/// An error raised by a backend kernel, in the backend's own error type.
pub type NativeError = Box<dyn StdError + Send + Sync + 'static>;

/// All errors that can occur within arbor.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No argument belonged to a known backend and the backend stack is empty.
    #[error("no backend found: no argument is native to a registered backend and the backend stack is empty")]
    NoBackendFound,

    /// `pop_backend` was called with nothing on the stack.
    #[error("cannot pop from an empty backend stack")]
    EmptyBackendStack,

    /// A backend was requested by a name that was never registered.
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),

    /// The resolved backend has no kernel with this name.
    #[error("{backend}: operation `{op}` is not supported")]
    UnsupportedOperation { op: String, backend: String },

    /// A backend claimed an op family but lacks one of its ops.
    #[error("{backend}: claims the {family} family but does not provide `{op}`")]
    MissingCapability {
        backend: String,
        family: &'static str,
        op: &'static str,
    },

    /// A kernel failed; the backend's error is kept as the source.
    #[error("{backend}: {op}: {message}")]
    Backend {
        op: String,
        backend: String,
        message: String,
        #[source]
        source: NativeError,
    },

    /// A kernel failed while exception debug mode was on; the backend's error is passed through as-is.
    #[error("{0}")]
    Native(#[source] NativeError),

    /// A key-chain does not address anything in the container.
    #[error("key-chain `{0}` not found")]
    KeyChainNotFound(String),

    /// A key-chain is already occupied and replacement was not allowed.
    #[error("key-chain `{0}` already exists")]
    KeyChainConflict(String),

    /// A wrapper was constructed from something that is not a native array.
    #[error("expected a native array, got {0}")]
    NotNativeArray(String),

    /// A variable wrapper was constructed from a non-trainable array.
    #[error("expected a trainable native array, got {0}")]
    NotVariable(String),

    /// An argument had the wrong kind or value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Two nested structures were expected to line up and do not.
    #[error("structure mismatch: {0}")]
    StructureMismatch(String),
}

impl Error {
    /// Normalize a backend's native error raised while running `op`.
    ///
    /// Under [`TraceMode::Full`] the message carries the native error's debug
    /// rendering and its whole source chain; under [`TraceMode::Summary`] only
    /// its display message. The native error is kept as the source either way.
    pub fn backend(op: &str, backend: &str, source: NativeError, trace: TraceMode) -> Self {
        let message = match trace {
            TraceMode::Summary => source.to_string(),
            TraceMode::Full => {
                let mut message = format!("{source:?}");
                let mut cause = source.source();
                while let Some(inner) = cause {
                    message.push_str(&format!("\n  caused by: {inner}"));
                    cause = inner.source();
                }
                message
            }
        };
        Error::Backend {
            op: op.to_string(),
            backend: backend.to_string(),
            message,
            source,
        }
    }

    /// Create an [`Error::InvalidArgument`] from any message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}

/// Convenience Result type used throughout arbor.
pub type Result<T> = std::result::Result<T, Error>;

/// Early return with a formatted [`Error::InvalidArgument`].
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::InvalidArgument(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::fmt;

    #[derive(Debug)]
    struct ShapeClash;

    impl fmt::Display for ShapeClash {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "shapes [3] and [2] cannot be broadcast")
        }
    }

    impl std::error::Error for ShapeClash {}

    #[test]
    fn test_backend_error_keeps_native_source() {
        let err = Error::backend("add", "ndarray", Box::new(ShapeClash), TraceMode::Summary);
        assert_eq!(err.to_string(), "ndarray: add: shapes [3] and [2] cannot be broadcast");
        let source = err.source().expect("source is kept");
        assert!(source.downcast_ref::<ShapeClash>().is_some());
    }

    #[test]
    fn test_full_trace_includes_debug_rendering() {
        let err = Error::backend("add", "ndarray", Box::new(ShapeClash), TraceMode::Full);
        match err {
            Error::Backend { message, .. } => assert_eq!(message, "ShapeClash"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_bail_returns_invalid_argument() {
        fn check(n: i64) -> Result<i64> {
            if n < 0 {
                crate::bail!("negative: {}", n);
            }
            Ok(n)
        }
        assert!(matches!(check(-1), Err(Error::InvalidArgument(m)) if m == "negative: -1"));
        assert_eq!(check(2).unwrap(), 2);
    }
}
