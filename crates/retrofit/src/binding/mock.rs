use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::binding::{Binding, BindingTensor, CudaRuntime, Parameter};
use crate::device::{Device, NativeDevice};
use crate::error::{Result, ShimError};
use crate::feature::FeatureTag;
use crate::loader::LoadOptions;
use crate::value::{ItemValue, Scalar, Value};

/// What `item` does on a mock tensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ItemMode {
    /// Returns the tensor id as an integer.
    Scalar,
    /// Returns the tensor id wrapped in two levels of sequence.
    Nested,
    /// Returns a string.
    Text,
    Fails,
}

#[derive(Clone, Debug)]
pub struct MockDevice {
    pub device: Device,
    pub accessor: bool,
}

impl NativeDevice for MockDevice {
    fn backend_str(&self) -> Option<String> {
        self.accessor.then(|| self.device.tag())
    }

    fn kind(&self) -> Option<String> {
        self.accessor.then(|| self.device.kind().to_string())
    }

    fn index(&self) -> Option<usize> {
        self.device.index()
    }

    fn describe(&self) -> String {
        if self.accessor {
            format!("Device({})", self.device)
        } else {
            self.device.tag()
        }
    }
}

// A simple mock tensor implementation for testing
#[derive(Clone, Debug, PartialEq)]
pub struct MockTensor {
    pub(crate) id: u32,
    pub(crate) device: Device,
    pub(crate) item_mode: ItemMode,
    pub(crate) accessor: bool,
}

impl MockTensor {
    pub fn new(id: u32, device: Device) -> Self {
        Self {
            id,
            device,
            item_mode: ItemMode::Scalar,
            accessor: true,
        }
    }

    pub fn on(id: u32, tag: &str) -> Self {
        Self::new(id, Device::parse(tag).unwrap())
    }
}

impl fmt::Display for MockTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MockTensor({}, {})", self.id, self.device)
    }
}

impl BindingTensor for MockTensor {
    type Device = MockDevice;

    fn device(&self) -> MockDevice {
        MockDevice {
            device: self.device.clone(),
            accessor: self.accessor,
        }
    }

    fn to_device(&self, device: &Device) -> Result<Self> {
        let mut moved = self.clone();
        moved.device = device.clone();
        Ok(moved)
    }

    fn item(&self) -> Result<ItemValue> {
        let id = Scalar::Int(i64::from(self.id));
        match self.item_mode {
            ItemMode::Scalar => Ok(ItemValue::Scalar(id)),
            ItemMode::Nested => Ok(ItemValue::Sequence(vec![ItemValue::Sequence(vec![
                ItemValue::Scalar(id),
            ])])),
            ItemMode::Text => Ok(ItemValue::Scalar(Scalar::Str(self.id.to_string()))),
            ItemMode::Fails => Err(ShimError::Binding("item is not implemented".to_string())),
        }
    }
}

#[derive(Default)]
pub struct MockCuda {
    pub set_device: bool,
    pub empty_cache: bool,
    pub calls: RefCell<Vec<String>>,
}

impl CudaRuntime for MockCuda {
    fn has_set_device(&self) -> bool {
        self.set_device
    }

    fn has_empty_cache(&self) -> bool {
        self.empty_cache
    }

    fn set_device(&self, device_id: i64) -> Result<()> {
        self.calls.borrow_mut().push(format!("set_device({device_id})"));
        Ok(())
    }

    fn empty_cache(&self) -> Result<()> {
        self.calls.borrow_mut().push("empty_cache".to_string());
        Ok(())
    }
}

/// How the mock answers device-targeted loads.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceLoad {
    Absent,
    Supported,
    Unsupported,
    Fails,
}

pub struct MockBinding {
    pub cuda: Option<MockCuda>,
    pub parameters: Option<Vec<Parameter>>,
    pub item_mode: ItemMode,
    pub device_load: DeviceLoad,
    pub checkpoints: HashMap<PathBuf, Value<MockTensor>>,
    pub loads: RefCell<Vec<String>>,
}

impl MockBinding {
    /// A binding that satisfies every capability natively.
    pub fn complete() -> Self {
        Self {
            cuda: Some(MockCuda {
                set_device: true,
                empty_cache: true,
                calls: RefCell::new(Vec::new()),
            }),
            parameters: Some(vec![
                Parameter::positional("filename"),
                Parameter::keyword("map_location"),
                Parameter::keyword("weights_only"),
            ]),
            item_mode: ItemMode::Scalar,
            device_load: DeviceLoad::Absent,
            checkpoints: HashMap::new(),
            loads: RefCell::new(Vec::new()),
        }
    }

    /// A binding missing every capability.
    pub fn bare() -> Self {
        FeatureTag::ALL
            .iter()
            .fold(Self::complete(), |binding, tag| binding.without(*tag))
    }

    /// Remove the capability behind `tag`.
    pub fn without(mut self, tag: FeatureTag) -> Self {
        match tag {
            FeatureTag::CudaSetDevice => {
                if let Some(cuda) = self.cuda.as_mut() {
                    cuda.set_device = false;
                }
            }
            FeatureTag::CudaEmptyCache => {
                if let Some(cuda) = self.cuda.as_mut() {
                    cuda.empty_cache = false;
                }
            }
            FeatureTag::LoadKeywords => {
                self.parameters = Some(vec![Parameter::positional("filename")]);
            }
            FeatureTag::TensorItemScalar => {
                self.item_mode = ItemMode::Nested;
            }
        }
        self
    }

    pub fn with_checkpoint(mut self, path: &str, value: Value<MockTensor>) -> Self {
        self.checkpoints.insert(PathBuf::from(path), value);
        self
    }

    pub fn with_device_load(mut self, device_load: DeviceLoad) -> Self {
        self.device_load = device_load;
        self
    }

    pub fn loads(&self) -> Vec<String> {
        self.loads.borrow().clone()
    }

    fn checkpoint(&self, source: &Path) -> Result<Value<MockTensor>> {
        self.checkpoints.get(source).cloned().ok_or_else(|| {
            ShimError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no checkpoint at {}", source.display()),
            ))
        })
    }
}

impl Binding for MockBinding {
    type Tensor = MockTensor;

    fn cuda(&self) -> Option<&dyn CudaRuntime> {
        self.cuda.as_ref().map(|cuda| cuda as &dyn CudaRuntime)
    }

    fn load_parameters(&self) -> Option<Vec<Parameter>> {
        self.parameters.clone()
    }

    fn probe_tensor(&self) -> Result<MockTensor> {
        let mut tensor = MockTensor::new(1, Device::cpu());
        tensor.item_mode = self.item_mode;
        Ok(tensor)
    }

    fn load(&self, source: &Path) -> Result<Value<MockTensor>> {
        self.loads.borrow_mut().push("load".to_string());
        self.checkpoint(source)
    }

    fn supports_device_load(&self) -> bool {
        self.device_load != DeviceLoad::Absent
    }

    fn load_with_device(&self, source: &Path, device: &Device) -> Result<Value<MockTensor>> {
        self.loads
            .borrow_mut()
            .push(format!("load_with_device({device})"));
        match self.device_load {
            DeviceLoad::Supported => self
                .checkpoint(source)?
                .try_map_tensors(&mut |tensor: MockTensor| tensor.to_device(device)),
            DeviceLoad::Fails => Err(ShimError::Binding("checkpoint is corrupt".to_string())),
            DeviceLoad::Absent | DeviceLoad::Unsupported => {
                Err(ShimError::Unsupported("device-targeted load"))
            }
        }
    }

    fn load_with_options(
        &self,
        source: &Path,
        options: &LoadOptions<MockTensor>,
    ) -> Result<Value<MockTensor>> {
        self.loads.borrow_mut().push(format!(
            "load_with_options(map_location: {}, weights_only: {})",
            options.map_location.is_some(),
            options.weights_only
        ));
        self.checkpoint(source)
    }
}
