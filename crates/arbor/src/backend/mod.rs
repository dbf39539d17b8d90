//! # Array Backends
//!
//! This module provides the interface every array library is adapted to, the
//! registry of known backends and the per-context backend stack.
//!
//! ## Feature Flags
//!
//! The module uses feature flags to conditionally compile support for different backends:
//!
//! - `candle`: Enables support for the Candle tensor library
//! - `burn`: Enables support for the Burn tensor library
//!
//! The ndarray backend is always available.
//!
//! ## Usage
//!
//! 1. Implement [`NativeTensor`](crate::NativeTensor) for the library's array type
//! 2. Implement [`Backend`], declaring the [`OpFamily`] values it covers and
//!    filling a [`KernelTable`]
//! 3. Hand it to [`register_backend`], which checks the declared families
//!
//! Calls then resolve to it whenever one of their arguments is one of its
//! arrays, or when it is on top of the backend stack.

mod core_trait;
mod kernel;
mod registry;

/// Always-on backend over `ndarray::ArrayD<f64>`.
pub mod ndarray;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle tensor backend implementation.
///
/// This module is only available when the `candle` feature flag is enabled.
/// It implements [`NativeTensor`](crate::NativeTensor) for Candle's `Tensor`
/// and registers a backend named `candle` on the default device.
pub mod candle;

#[cfg_attr(docsrs, doc(cfg(feature = "burn")))]
#[cfg(feature = "burn")]
/// Burn tensor backend implementation.
///
/// This module is only available when the `burn` feature flag is enabled.
/// Burn fixes tensor rank at compile time, so arrays are carried as
/// [`burn::BurnArray`], an enum over the supported float ranks.
pub mod burn;

pub use core_trait::*;
pub use kernel::*;
pub use registry::*;

#[cfg(test)]
/// Mock backend.
///
/// Arrays are a shape plus one constant value.
pub(crate) mod mock_tensor;
