//! Purpose-built call sites for the two native CUDA functions the shim uses.
//!
//! Both resolve lazily on first call and keep the outcome, bound or not, for
//! the rest of the process.

use std::cell::Cell;
use std::ffi::c_int;
use std::rc::Rc;

use once_cell::unsync::OnceCell;

use crate::config::{CUDA_GET_DEVICE_COUNT, NativeLibrary};
use crate::error::{Result, ShimError};
use crate::warning::{WARNING_PREFIX, WarningSink};

use super::resolver::{NativeFunction, NativeResolver, ResolveError};

/// `cudaError_t cudaSetDevice(int device)`
pub type CudaSetDeviceFn = unsafe extern "C" fn(c_int) -> c_int;

/// `cudaError_t cudaGetDeviceCount(int* count)`
pub type CudaGetDeviceCountFn = unsafe extern "C" fn(*mut c_int) -> c_int;

/// `void c10::cuda::CUDACachingAllocator::emptyCache()`
pub type EmptyCacheFn = unsafe extern "C" fn();

/// `cudaSuccess`
pub const CUDA_SUCCESS: c_int = 0;

/// A native function resolved on first use and memoized forever after.
struct LazyNative<F> {
    library: NativeLibrary,
    bound: OnceCell<std::result::Result<NativeFunction<F>, ResolveError>>,
}

impl<F: Copy> LazyNative<F> {
    fn new(library: NativeLibrary) -> Self {
        Self {
            library,
            bound: OnceCell::new(),
        }
    }

    /// # Safety
    ///
    /// `F` must match the signature of every configured symbol.
    unsafe fn get(
        &self,
        resolver: &NativeResolver,
    ) -> std::result::Result<&NativeFunction<F>, &ResolveError> {
        self.bound
            .get_or_init(|| {
                let candidates = self.library.candidates();
                // Safety: forwarded to the caller.
                unsafe { resolver.resolve::<F>(&candidates, self.library.symbols()) }
            })
            .as_ref()
    }

    fn is_resolved(&self) -> bool {
        self.bound.get().is_some()
    }
}

/// Replacement for the binding's device selection, backed by `cudaSetDevice`.
///
/// Device selection is correctness-critical, so when the function cannot be
/// resolved every call fails. `cudaGetDeviceCount` is looked up once, from
/// the same library, the first time `cudaSetDevice` binds.
pub struct NativeSetDevice {
    function: LazyNative<CudaSetDeviceFn>,
    device_count: OnceCell<Option<CudaGetDeviceCountFn>>,
}

impl NativeSetDevice {
    pub const ENTRY: &'static str = "CUDA set_device";

    pub fn new(library: NativeLibrary) -> Self {
        Self {
            function: LazyNative::new(library),
            device_count: OnceCell::new(),
        }
    }

    pub fn call(&self, resolver: &NativeResolver, device_id: i64) -> Result<()> {
        let native_id = c_int::try_from(device_id)
            .map_err(|_| ShimError::UnknownDevice(format!("device id {device_id} does not fit a native int")))?;

        // Safety: every configured symbol is `cudaSetDevice`.
        let function = unsafe { self.function.get(resolver) }.map_err(|err| {
            ShimError::Unavailable {
                entry: Self::ENTRY,
                reason: err.to_string(),
            }
        })?;

        let device_count = *self.device_count.get_or_init(|| {
            // Safety: `cudaGetDeviceCount` lives in the same runtime library.
            unsafe { function.sibling::<CudaGetDeviceCountFn>(CUDA_GET_DEVICE_COUNT) }
        });
        if let Some(count_fn) = device_count {
            let mut count: c_int = 0;
            // Safety: `count` is a valid, writable int for the duration of the call.
            let status = unsafe { count_fn(&mut count) };
            if status != CUDA_SUCCESS {
                return Err(ShimError::NativeCall {
                    call: CUDA_GET_DEVICE_COUNT.to_string(),
                    code: status,
                });
            }
            if native_id < 0 || native_id >= count {
                return Err(ShimError::InvalidDevice {
                    device_id,
                    available: count,
                });
            }
        }

        // Safety: plain int argument, int status return.
        let status = unsafe { (function.get())(native_id) };
        if status != CUDA_SUCCESS {
            return Err(ShimError::NativeCall {
                call: format!("{}({})", function.symbol(), device_id),
                code: status,
            });
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.function.is_resolved()
    }
}

/// Replacement for the binding's cache clear, backed by libtorch's caching
/// allocator.
///
/// Clearing the cache is a performance hint, so an unresolvable function
/// warns once and then silently does nothing.
pub struct NativeEmptyCache {
    function: LazyNative<EmptyCacheFn>,
    warned: Cell<bool>,
    sink: Rc<dyn WarningSink>,
}

impl NativeEmptyCache {
    pub const ENTRY: &'static str = "CUDA empty_cache";

    pub fn new(library: NativeLibrary, sink: Rc<dyn WarningSink>) -> Self {
        Self {
            function: LazyNative::new(library),
            warned: Cell::new(false),
            sink,
        }
    }

    pub fn call(&self, resolver: &NativeResolver) -> Result<()> {
        // Safety: every configured symbol is the no-argument `emptyCache`.
        match unsafe { self.function.get(resolver) } {
            Ok(function) => {
                // Safety: no arguments, no return value.
                unsafe { (function.get())() };
            }
            Err(err) => {
                if !self.warned.replace(true) {
                    tracing::debug!("empty_cache resolution failed: {}", err);
                    self.sink.warn(&format!(
                        "{WARNING_PREFIX} {} is unavailable; ensure the binding is built with CUDA or upgrade it.",
                        Self::ENTRY
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.function.is_resolved()
    }
}
