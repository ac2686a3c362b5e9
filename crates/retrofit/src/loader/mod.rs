//! # Checkpoint loading
//!
//! [`TensorLoader`] layers two independent concerns on top of a binding's
//! plain deserialization:
//!
//! * **Device remapping** (`map_location`): every tensor in the loaded graph
//!   is moved according to a [`MapLocation`]. When the whole mapping boils down
//!   to a single device and the binding can load straight onto a device, the
//!   checkpoint is read there directly.
//! * **Content gating** (`weights_only`): the as-loaded graph may contain
//!   only primitive scalars and tensors, nested in sequences and mappings.
//!
//! One pass runs read, then validate, then remap. Validation sees the graph
//! before any tensor has been moved, and a failed validation means nothing
//! is returned.

mod map_location;

use std::fmt;
use std::path::Path;

use tracing::debug;

use crate::binding::Binding;
use crate::device::Device;
use crate::error::{Result, ShimError};
use crate::value::{Opaque, Value, Visitor};

pub use map_location::{MapFn, MapLocation};

pub(crate) use map_location::{apply_map_location, single_device};

/// Options of a load call. The default matches the plain call:
/// no remapping, no content gating.
pub struct LoadOptions<T> {
    pub map_location: Option<MapLocation<T>>,
    pub weights_only: bool,
}

impl<T> LoadOptions<T> {
    pub fn new() -> Self {
        Self {
            map_location: None,
            weights_only: false,
        }
    }

    pub fn map_location(mut self, map_location: impl Into<MapLocation<T>>) -> Self {
        self.map_location = Some(map_location.into());
        self
    }

    pub fn weights_only(mut self, weights_only: bool) -> Self {
        self.weights_only = weights_only;
        self
    }
}

impl<T> Default for LoadOptions<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LoadOptions<T> {
    fn clone(&self) -> Self {
        Self {
            map_location: self.map_location.clone(),
            weights_only: self.weights_only,
        }
    }
}

impl<T> fmt::Debug for LoadOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("map_location", &self.map_location)
            .field("weights_only", &self.weights_only)
            .finish()
    }
}

/// Rejects every leaf that is not a primitive scalar or a tensor.
struct WeightsOnly;

impl<T> Visitor<T> for WeightsOnly {
    type Error = ShimError;

    fn visit_opaque(&mut self, opaque: &Opaque) -> Result<()> {
        Err(ShimError::WeightsOnly {
            type_name: opaque.type_name.clone(),
        })
    }
}

/// Check that `value` holds only what a `weights_only` load admits.
pub fn ensure_weights_only<T>(value: &Value<T>) -> Result<()> {
    value.accept(&mut WeightsOnly)
}

/// Deserialization with device remapping and content gating.
pub struct TensorLoader<'a, B> {
    binding: &'a B,
}

impl<'a, B: Binding> TensorLoader<'a, B> {
    pub fn new(binding: &'a B) -> Self {
        Self { binding }
    }

    pub fn load(&self, source: &Path, options: &LoadOptions<B::Tensor>) -> Result<Value<B::Tensor>> {
        let load_device = match &options.map_location {
            Some(map_location) => single_device(self.binding, map_location)?,
            None => None,
        };

        let value = match load_device {
            Some(device) if self.binding.supports_device_load() => {
                self.load_with_device(source, &device)?
            }
            _ => self.binding.load(source)?,
        };

        if options.weights_only {
            ensure_weights_only(&value)?;
        }

        match &options.map_location {
            Some(map_location) => apply_map_location(self.binding, value, map_location),
            None => Ok(value),
        }
    }

    /// Device-targeted read; only a binding that reports the operation as
    /// unsupported falls back to the plain read.
    fn load_with_device(&self, source: &Path, device: &Device) -> Result<Value<B::Tensor>> {
        match self.binding.load_with_device(source, device) {
            Err(ShimError::Unsupported(operation)) => {
                debug!("{} unavailable, falling back to plain load", operation);
                self.binding.load(source)
            }
            other => other,
        }
    }
}
