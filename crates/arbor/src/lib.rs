//! # Arbor
//!
//! Backend-agnostic array operations over nested data.
//!
//! ## Overview
//!
//! Arbor lets one piece of numerical code run on top of several array
//! libraries. A call names an operation (`"add"`, `"matmul"`, ...) and passes
//! its arguments; the library works out which backend the arguments belong
//! to, unwraps them, runs that backend's kernel and hands the result back in
//! the same form it received.
//!
//! Key components include:
//!
//! - A backend interface with a process-wide registry and a scoped backend stack
//! - Backend-neutral [`Array`] and [`Variable`] wrappers around native arrays
//! - Conversions between wrappers and native arrays, at any nesting depth
//! - [`Container`], a key-chain addressable tree with map, multi-map,
//!   restructure and prune combinators
//!
//! ## Architecture
//!
//! ### Values
//!
//! Everything passed through the library is a [`Value`]: scalars, strings,
//! native arrays, wrappers, sequences, mappings, records and containers.
//! Native arrays are type-erased behind [`NativeTensor`], so a single call
//! can carry arrays from any backend.
//!
//! ### Backends
//!
//! The [`Backend`](backend::Backend) trait describes one array library: how to
//! recognise its arrays and which kernels it provides. Resolution prefers an
//! explicit backend, then the backend owning the first native argument, then
//! the top of the backend stack.
//!
//! ### Context
//!
//! Wrapped mode, debug mode, trace mode and the backend stack live in a
//! [`Context`]. Each thread has its own; async tasks can run under a private
//! one through [`context::scope`].
//!
//! ## Features
//!
//! - **candle** - Enables the candle backend
//! - **burn** - Enables the burn backend
//!
//! The ndarray backend is always compiled in.

mod array;
mod dispatch;
mod error;
mod value;

pub mod backend;
pub mod classify;
pub mod config;
pub mod container;
pub mod context;
pub mod convert;

pub use array::{Array, Variable};
pub use backend::{
    BackendGuard, BackendHandle, backend_stack, clear_backend_stack, current_backend, get_backend, pop_backend,
    push_backend, register_backend, registered_backends, set_backend_by_name, use_backend, with_backend,
};
pub use config::Config;
pub use container::{Container, MapOptions, Restructure};
pub use context::{Context, DebugMode, TraceMode};
pub use dispatch::{Args, dispatch, dispatch_in};
pub use error::{Error, NativeError, Result};
pub use value::{DType, Kwargs, NativeArray, NativeTensor, Record, Value};
