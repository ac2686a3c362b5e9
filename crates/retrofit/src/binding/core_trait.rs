use std::fmt::Debug;
use std::path::Path;

use crate::device::{Device, NativeDevice};
use crate::error::{Result, ShimError};
use crate::loader::LoadOptions;
use crate::value::{ItemValue, Value};

/// The tensor type of a wrapped binding.
pub trait BindingTensor: Clone + Debug {
    /// The binding's own device object.
    type Device: NativeDevice;

    /// The device this tensor currently lives on.
    fn device(&self) -> Self::Device;

    /// Copy or move this tensor onto `device`.
    fn to_device(&self, device: &Device) -> Result<Self>;

    /// The binding's native scalar extraction, unmodified.
    fn item(&self) -> Result<ItemValue>;
}

/// The binding's device-control namespace.
///
/// A binding that has no such namespace at all returns `None` from
/// [`Binding::cuda`]; one that has it but lacks an operation answers `false`
/// from the matching `has_*` query.
pub trait CudaRuntime {
    fn has_set_device(&self) -> bool;

    fn has_empty_cache(&self) -> bool;

    /// Select the device used by subsequent native work.
    fn set_device(&self, device_id: i64) -> Result<()>;

    /// Release cached, currently unused device memory.
    fn empty_cache(&self) -> Result<()>;
}

/// How a formal parameter of the binding's load entry point is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Positional,
    Optional,
    Keyword,
    KeywordRequired,
}

/// One formal parameter of the binding's load entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
}

impl Parameter {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn positional(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Positional)
    }

    pub fn keyword(name: impl Into<String>) -> Self {
        Self::new(name, ParameterKind::Keyword)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(self.kind, ParameterKind::Keyword | ParameterKind::KeywordRequired)
    }
}

/// Everything the shim needs from the wrapped tensor library.
///
/// The optional operations have defaults that report
/// [`ShimError::Unsupported`], so an adapter only implements what its
/// library actually offers.
pub trait Binding {
    type Tensor: BindingTensor;

    /// The device-control namespace, if the binding has one.
    fn cuda(&self) -> Option<&dyn CudaRuntime> {
        None
    }

    /// Formal parameters of the load entry point, or `None` when the binding
    /// cannot describe them.
    fn load_parameters(&self) -> Option<Vec<Parameter>>;

    /// A throwaway one-element, two-dimensional tensor (`[[1]]`).
    fn probe_tensor(&self) -> Result<Self::Tensor>;

    /// Plain deserialization, leaving tensors wherever the checkpoint put them.
    fn load(&self, source: &Path) -> Result<Value<Self::Tensor>>;

    fn supports_device_load(&self) -> bool {
        false
    }

    /// Deserialize straight onto `device`.
    fn load_with_device(&self, _source: &Path, _device: &Device) -> Result<Value<Self::Tensor>> {
        Err(ShimError::Unsupported("device-targeted load"))
    }

    /// The binding's own keyword-aware load; only called when
    /// [`load_parameters`](Binding::load_parameters) advertises both keywords.
    fn load_with_options(
        &self,
        _source: &Path,
        _options: &LoadOptions<Self::Tensor>,
    ) -> Result<Value<Self::Tensor>> {
        Err(ShimError::Unsupported("map_location/weights_only keywords"))
    }

    /// Turn a textual device tag into a [`Device`].
    fn parse_device(&self, tag: &str) -> Result<Device> {
        Device::parse(tag)
    }
}
