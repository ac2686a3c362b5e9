//! # Native library configuration
//!
//! Each native dependency the shim can call into is described by a
//! [`NativeLibrary`]: the environment variable an operator can set to pin an
//! exact library, the build-convention paths and bare library names tried
//! after it, and the exported symbol names to bind.
//!
//! The candidate order is always: override, then paths, then bare names left
//! to the dynamic loader's default search path.

use std::env;

/// Environment override for the CUDA runtime library.
pub const LIBCUDART_PATH: &str = "LIBCUDART_PATH";

/// Environment override for the libtorch CUDA library holding the caching allocator.
pub const LIBTORCH_CUDA_PATH: &str = "LIBTORCH_CUDA_PATH";

/// Exported name of the device-selection function.
pub const CUDA_SET_DEVICE: &str = "cudaSetDevice";

/// Exported name of the device-count query used to validate ordinals.
pub const CUDA_GET_DEVICE_COUNT: &str = "cudaGetDeviceCount";

/// `c10::cuda::CUDACachingAllocator::emptyCache()` under the mangled names it
/// has been exported with across releases.
pub const EMPTY_CACHE_SYMBOLS: [&str; 2] = [
    "_ZN3c103cuda20CUDACachingAllocator9emptyCacheEv",
    "_ZN3c103cuda20CUDACachingAllocator10emptyCacheEv",
];

const CUDART_DEFAULTS: [&str; 7] = [
    "/usr/local/cuda/lib64/libcudart.so",
    "/usr/local/cuda/lib/libcudart.so",
    "/usr/local/cuda/lib/libcudart.dylib",
    "libcudart.so.12",
    "libcudart.so.11",
    "libcudart.so",
    "libcudart.dylib",
];

const TORCH_CUDA_DEFAULTS: [&str; 6] = [
    "/usr/local/lib/libtorch_cuda.so",
    "/usr/local/lib/libtorch_cuda.dylib",
    "/usr/local/lib64/libtorch_cuda.so",
    "/usr/lib/libtorch_cuda.so",
    "libtorch_cuda.so",
    "libtorch_cuda.dylib",
];

/// Where to find one native dependency and which symbols to bind from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    env_var: Option<String>,
    defaults: Vec<String>,
    symbols: Vec<String>,
}

impl NativeLibrary {
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Self {
        Self {
            env_var: None,
            defaults: Vec::new(),
            symbols: symbols.into_iter().map(Into::into).collect(),
        }
    }

    /// Consult `name` before any other candidate.
    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = Some(name.into());
        self
    }

    /// Replace the build-convention paths and bare names.
    pub fn with_defaults<S: Into<String>>(mut self, defaults: impl IntoIterator<Item = S>) -> Self {
        self.defaults = defaults.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the symbol names tried in each loaded library.
    pub fn with_symbols<S: Into<String>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }

    pub fn env_var(&self) -> Option<&str> {
        self.env_var.as_deref()
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Candidate libraries in resolution order, reading the override now.
    pub fn candidates(&self) -> Vec<String> {
        let pinned = self
            .env_var
            .as_deref()
            .and_then(|name| env::var(name).ok());
        self.candidates_with(pinned)
    }

    /// Candidate libraries in resolution order for an explicit override value.
    ///
    /// An empty override is ignored.
    pub fn candidates_with(&self, pinned: Option<String>) -> Vec<String> {
        pinned
            .filter(|path| !path.trim().is_empty())
            .into_iter()
            .chain(self.defaults.iter().cloned())
            .collect()
    }

    /// Whether there is anything to resolve at all: at least one library
    /// source and one symbol.
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("no candidate symbol names configured".to_string());
        }
        if self.defaults.is_empty() && self.env_var.is_none() {
            return Err("no candidate libraries configured".to_string());
        }
        Ok(())
    }
}

/// Native dependencies consulted by the shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimConfig {
    /// CUDA runtime; provides device selection.
    pub cudart: NativeLibrary,
    /// libtorch CUDA; provides the caching allocator's cache clear.
    pub torch_cuda: NativeLibrary,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            cudart: NativeLibrary::new([CUDA_SET_DEVICE])
                .with_env_var(LIBCUDART_PATH)
                .with_defaults(CUDART_DEFAULTS),
            torch_cuda: NativeLibrary::new(EMPTY_CACHE_SYMBOLS)
                .with_env_var(LIBTORCH_CUDA_PATH)
                .with_defaults(TORCH_CUDA_DEFAULTS),
        }
    }
}
