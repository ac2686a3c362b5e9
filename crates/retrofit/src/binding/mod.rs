//! # Binding adapters
//!
//! This module describes, as traits, exactly the operations the shim needs
//! from the native tensor library it wraps, so that detection and patching
//! work the same way whatever library sits underneath.
//!
//! ## Feature Flags
//!
//! - `candle`: Enables the adapter for the Candle tensor library
//!
//! ## Usage
//!
//! 1. Implement [`Binding`] and [`BindingTensor`] for the library (or enable a
//!    feature flag for a bundled adapter)
//! 2. Hand the binding to [`Shim`](crate::Shim)
//! 3. Call the shim's entry points instead of the binding's

mod core_trait;

#[cfg_attr(docsrs, doc(cfg(feature = "candle")))]
#[cfg(feature = "candle")]
/// Candle binding adapter.
///
/// This module is only available when the `candle` feature flag is enabled.
/// It wraps candle-core's safetensors and pickle loaders and its device
/// handling. Candle has no device-control namespace, so both CUDA entry
/// points are served by the native resolver.
pub mod candle;

pub use core_trait::*;

#[cfg(test)]
/// Mock binding implementation.
///
/// Capabilities are toggled per test; checkpoints are in-memory graphs.
pub(crate) mod mock;
