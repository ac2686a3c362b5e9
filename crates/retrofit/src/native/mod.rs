//! # Native function bridge
//!
//! Runtime-loaded CUDA and libtorch function pointers via dlopen, so the
//! shim works against whatever CUDA install is present without a build-time
//! dependency on it.
//!
//! Provides:
//! - Ordered library/symbol resolution with an operator override
//! - The `cudaSetDevice` call site (fails loudly when unresolvable)
//! - The caching-allocator `emptyCache` call site (warns once when unresolvable)

pub mod cuda;
pub mod resolver;

pub use cuda::{NativeEmptyCache, NativeSetDevice};
pub use resolver::{DynamicLoader, LibraryLoader, LoadedLibrary, NativeFunction, NativeResolver, ResolveError};
