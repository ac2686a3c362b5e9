use std::collections::BTreeMap;
use std::path::Path;

use candle_core::{DType, DeviceLocation, Tensor};

use super::{Binding, BindingTensor, Parameter};
use crate::device::{Device, NativeDevice};
use crate::error::{Result, ShimError};
use crate::value::{ItemValue, Scalar, Value};

const SAFETENSORS_EXTENSION: &str = "safetensors";

impl NativeDevice for candle_core::Device {
    fn backend_str(&self) -> Option<String> {
        Some(match self.location() {
            DeviceLocation::Cpu => "cpu".to_string(),
            DeviceLocation::Cuda { gpu_id } => format!("cuda:{gpu_id}"),
            DeviceLocation::Metal { gpu_id } => format!("metal:{gpu_id}"),
        })
    }

    fn kind(&self) -> Option<String> {
        let kind = match self.location() {
            DeviceLocation::Cpu => "cpu",
            DeviceLocation::Cuda { .. } => "cuda",
            DeviceLocation::Metal { .. } => "metal",
        };
        Some(kind.to_string())
    }

    fn index(&self) -> Option<usize> {
        match self.location() {
            DeviceLocation::Cpu => None,
            DeviceLocation::Cuda { gpu_id } | DeviceLocation::Metal { gpu_id } => Some(gpu_id),
        }
    }

    fn describe(&self) -> String {
        format!("{:?}", self.location())
    }
}

/// The candle device a [`Device`] names.
fn candle_device(device: &Device) -> Result<candle_core::Device> {
    let ordinal = device.index().unwrap_or(0);
    match device.kind() {
        "cpu" => Ok(candle_core::Device::Cpu),
        "cuda" => Ok(candle_core::Device::new_cuda(ordinal)?),
        "metal" => Ok(candle_core::Device::new_metal(ordinal)?),
        _ => Err(ShimError::UnknownDevice(device.tag())),
    }
}

/// Nest `flat` into sequences following `dims`.
fn nest(flat: &mut impl Iterator<Item = Scalar>, dims: &[usize]) -> ItemValue {
    match dims.split_first() {
        None => ItemValue::Scalar(flat.next().unwrap_or(Scalar::Nil)),
        Some((len, rest)) => ItemValue::Sequence((0..*len).map(|_| nest(flat, rest)).collect()),
    }
}

impl BindingTensor for Tensor {
    type Device = candle_core::Device;

    fn device(&self) -> candle_core::Device {
        Tensor::device(self).clone()
    }

    fn to_device(&self, device: &Device) -> Result<Self> {
        let target = candle_device(device)?;
        Ok(Tensor::to_device(self, &target)?)
    }

    /// A rank-0 tensor gives its scalar; anything else comes back as nested
    /// sequences shaped like the tensor.
    fn item(&self) -> Result<ItemValue> {
        let flat = self.flatten_all()?;
        let mut values: Box<dyn Iterator<Item = Scalar>> = if self.dtype().is_int() {
            Box::new(flat.to_dtype(DType::I64)?.to_vec1::<i64>()?.into_iter().map(Scalar::Int))
        } else {
            Box::new(flat.to_dtype(DType::F64)?.to_vec1::<f64>()?.into_iter().map(Scalar::Float))
        };
        Ok(nest(&mut values, self.dims()))
    }
}

/// Binding over candle-core.
///
/// Checkpoints are read from `.safetensors` files (straight onto any device)
/// or from PyTorch pickle files (CPU only). Candle exposes no device-control
/// namespace and no keyword load.
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleBinding;

impl CandleBinding {
    pub fn new() -> Self {
        Self
    }

    fn is_safetensors(source: &Path) -> bool {
        source
            .extension()
            .is_some_and(|extension| extension == SAFETENSORS_EXTENSION)
    }

    fn read(&self, source: &Path, device: &candle_core::Device) -> Result<Value<Tensor>> {
        let tensors: BTreeMap<String, Tensor> = if Self::is_safetensors(source) {
            candle_core::safetensors::load(source, device)?
                .into_iter()
                .collect()
        } else {
            candle_core::pickle::read_all(source)?.into_iter().collect()
        };
        Ok(Value::Mapping(
            tensors
                .into_iter()
                .map(|(name, tensor)| (Value::str(name), Value::Tensor(tensor)))
                .collect(),
        ))
    }
}

impl Binding for CandleBinding {
    type Tensor = Tensor;

    fn load_parameters(&self) -> Option<Vec<Parameter>> {
        Some(vec![
            Parameter::positional("filename"),
            Parameter::positional("device"),
        ])
    }

    fn probe_tensor(&self) -> Result<Tensor> {
        Ok(Tensor::new(&[[1i64]], &candle_core::Device::Cpu)?)
    }

    fn load(&self, source: &Path) -> Result<Value<Tensor>> {
        self.read(source, &candle_core::Device::Cpu)
    }

    fn supports_device_load(&self) -> bool {
        true
    }

    fn load_with_device(&self, source: &Path, device: &Device) -> Result<Value<Tensor>> {
        if !Self::is_safetensors(source) {
            return Err(ShimError::Unsupported("device-targeted load of pickle checkpoints"));
        }
        let device = candle_device(device)?;
        self.read(source, &device)
    }
}
