//! Error types surfaced by the shim.

use thiserror::Error;

use crate::feature::FeatureTag;

/// Every failure the shim reports to its caller.
///
/// Resolution failures are deferred: they are only produced when a patched
/// entry point is actually invoked, never while patches are installed.
#[derive(Debug, Error)]
pub enum ShimError {
    /// No candidate native library exported the function backing an entry point.
    #[error("{entry} is unavailable; ensure the binding is built with CUDA or upgrade it ({reason})")]
    Unavailable { entry: &'static str, reason: String },

    /// A native function returned a failure status.
    #[error("{call} failed with code {code}")]
    NativeCall { call: String, code: i32 },

    /// The requested device ordinal is outside the range the runtime reports.
    #[error("Invalid device_id {device_id} for CUDA (available devices: {available})")]
    InvalidDevice { device_id: i64, available: i32 },

    /// A `weights_only` load met a leaf that is neither a primitive nor a tensor.
    #[error("weights_only load supports tensors, primitive types, sequences, and mappings (found {type_name})")]
    WeightsOnly { type_name: String },

    /// A `map_location` callable returned something other than a tensor or nil.
    #[error("map_location callable must return a Tensor or nil (got {type_name})")]
    MapLocationContract { type_name: String },

    #[error("Unsupported map_location: {0}")]
    UnsupportedMapLocation(String),

    #[error("Unknown device reference: {0}")]
    UnknownDevice(String),

    /// The wrapped binding does not implement the requested operation.
    #[error("binding does not support {0}")]
    Unsupported(&'static str),

    /// Installing the replacement for a feature failed.
    #[error("failed to install patch for {feature}: {reason}")]
    Install { feature: FeatureTag, reason: String },

    /// Any other failure reported by the wrapped binding.
    #[error("binding error: {0}")]
    Binding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "candle")]
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Result type used throughout the shim.
pub type Result<T> = std::result::Result<T, ShimError>;
