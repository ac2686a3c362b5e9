//! # Patch application
//!
//! [`Shim`] owns a binding and serves five entry points on its behalf:
//! device selection, cache clearing, scalar extraction, checkpoint loading
//! and device-string conversion. Each entry point starts out delegating to
//! the binding. [`Shim::apply_if_needed`] detects which capabilities the
//! binding lacks and swaps in a replacement for exactly those, once.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──apply──▶ Applying ──▶ Applied
//!                        │
//!                        └──install error──▶ Partial
//! ```
//!
//! The state moves to `Applying` before the warning is emitted, so an
//! `apply_if_needed` reached again from inside the warning sink (or from any
//! install step) returns immediately. A shim that ends up `Partial` keeps the
//! replacements installed before the failure and is never retried.
//!
//! ## Example
//!
//! ```ignore
//! let shim = Shim::init(binding)?;
//! shim.set_device(0)?;
//! let state = shim.load("model.pt", LoadOptions::new().map_location("cpu"))?;
//! ```

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use once_cell::unsync::OnceCell;
use tracing::{debug, info};

use crate::binding::{Binding, BindingTensor, CudaRuntime};
use crate::config::ShimConfig;
use crate::device::{DeviceSource, DeviceString, NativeDevice};
use crate::error::{Result, ShimError};
use crate::feature::{FeatureDetector, FeatureSet, FeatureTag};
use crate::loader::{LoadOptions, TensorLoader};
use crate::native::{NativeEmptyCache, NativeResolver, NativeSetDevice};
use crate::value::{ItemValue, Scalar, Value};
use crate::warning::{WARNING_PREFIX, WarningSink, default_sink};

/// Where a shim is in its one-shot patch lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchState {
    /// Nothing has been attempted yet.
    Pending,
    /// Replacements are being installed; `installed` lists those done so far.
    Applying { installed: FeatureSet },
    /// Every missing capability has a replacement.
    Applied { installed: FeatureSet },
    /// Installing the replacement for `failed` raised an error.
    Partial {
        installed: FeatureSet,
        failed: FeatureTag,
    },
}

impl PatchState {
    /// The capabilities that currently have a replacement installed.
    pub fn installed(&self) -> Option<&FeatureSet> {
        match self {
            PatchState::Pending => None,
            PatchState::Applying { installed }
            | PatchState::Applied { installed }
            | PatchState::Partial { installed, .. } => Some(installed),
        }
    }
}

enum SetDevice {
    Binding,
    Native(NativeSetDevice),
}

enum EmptyCache {
    Binding,
    Native(NativeEmptyCache),
}

#[derive(Clone, Copy)]
enum Load {
    Binding,
    Shim,
}

#[derive(Clone, Copy)]
enum Item {
    Binding,
    Flatten,
}

#[derive(Clone, Copy)]
enum DeviceText {
    Binding,
    Canonical,
}

/// The strategy currently serving each entry point.
struct EntryPoints {
    set_device: SetDevice,
    empty_cache: EmptyCache,
    load: Load,
    item: Item,
    device_text: DeviceText,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            set_device: SetDevice::Binding,
            empty_cache: EmptyCache::Binding,
            load: Load::Binding,
            item: Item::Binding,
            device_text: DeviceText::Binding,
        }
    }
}

/// Install steps, in the order they run.
#[derive(Debug, Clone, Copy)]
enum Step {
    SetDevice,
    EmptyCache,
    DeviceHelpers,
    Load,
    Item,
}

impl Step {
    const ORDER: [Step; 5] = [
        Step::SetDevice,
        Step::EmptyCache,
        Step::DeviceHelpers,
        Step::Load,
        Step::Item,
    ];

    /// The capability this step replaces. Device helpers are unconditional.
    fn feature(self) -> Option<FeatureTag> {
        match self {
            Step::SetDevice => Some(FeatureTag::CudaSetDevice),
            Step::EmptyCache => Some(FeatureTag::CudaEmptyCache),
            Step::DeviceHelpers => None,
            Step::Load => Some(FeatureTag::LoadKeywords),
            Step::Item => Some(FeatureTag::TensorItemScalar),
        }
    }
}

/// A binding plus the replacements for whatever it is missing.
///
/// # Type Parameters
///
/// * `B` - The wrapped binding
pub struct Shim<B: Binding> {
    binding: B,
    config: ShimConfig,
    resolver: NativeResolver,
    sink: Rc<dyn WarningSink>,
    missing: OnceCell<FeatureSet>,
    state: RefCell<PatchState>,
    entries: RefCell<EntryPoints>,
}

impl<B: Binding> Shim<B> {
    /// Wrap `binding` with the default native library lists. Nothing is
    /// detected or installed until [`apply_if_needed`](Shim::apply_if_needed).
    pub fn new(binding: B) -> Self {
        Self::with_config(binding, ShimConfig::default())
    }

    pub fn with_config(binding: B, config: ShimConfig) -> Self {
        Self {
            binding,
            config,
            resolver: NativeResolver::default(),
            sink: default_sink(),
            missing: OnceCell::new(),
            state: RefCell::new(PatchState::Pending),
            entries: RefCell::new(EntryPoints::default()),
        }
    }

    /// Route warnings to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: Rc<dyn WarningSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Resolve native functions through `resolver` instead of the system loader.
    pub fn with_resolver(mut self, resolver: NativeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Wrap `binding` and apply whatever patches it needs.
    pub fn init(binding: B) -> Result<Self> {
        let shim = Self::new(binding);
        shim.apply_if_needed()?;
        Ok(shim)
    }

    pub fn binding(&self) -> &B {
        &self.binding
    }

    /// Capabilities the binding lacks, detected on first call.
    pub fn missing_features(&self) -> &FeatureSet {
        self.missing
            .get_or_init(|| FeatureDetector::new(&self.binding).detect())
    }

    pub fn patch_state(&self) -> PatchState {
        self.state.borrow().clone()
    }

    /// Whether a replacement for `tag` is installed.
    pub fn is_patched(&self, tag: FeatureTag) -> bool {
        self.state
            .borrow()
            .installed()
            .is_some_and(|installed| installed.contains(tag))
    }

    /// Install replacements for every missing capability.
    ///
    /// Runs at most once per shim; later calls, including re-entrant ones,
    /// return `Ok(())` without doing anything. A binding that lacks nothing
    /// is left untouched and no warning is emitted.
    ///
    /// # Returns
    ///
    /// The installation error of the first replacement that could not be
    /// installed. Native resolution problems are not installation errors;
    /// they surface when the patched entry point is called.
    pub fn apply_if_needed(&self) -> Result<()> {
        if *self.state.borrow() != PatchState::Pending {
            return Ok(());
        }

        let missing = self.missing_features();
        if missing.is_empty() {
            debug!("binding supports every capability, nothing to patch");
            return Ok(());
        }

        *self.state.borrow_mut() = PatchState::Applying {
            installed: FeatureSet::new(),
        };
        self.sink.warn(&format!(
            "{WARNING_PREFIX} Applying compatibility patch for: {missing}. Please upgrade the binding for native support."
        ));

        let mut installed = FeatureSet::new();
        for step in Step::ORDER {
            let Some(tag) = step.feature() else {
                self.entries.borrow_mut().device_text = DeviceText::Canonical;
                debug!("installed {:?}", step);
                continue;
            };
            if !missing.contains(tag) {
                continue;
            }
            if let Err(err) = self.install(tag) {
                *self.state.borrow_mut() = PatchState::Partial {
                    installed,
                    failed: tag,
                };
                return Err(err);
            }
            debug!("installed {:?}", step);
            installed.insert(tag);
            *self.state.borrow_mut() = PatchState::Applying {
                installed: installed.clone(),
            };
        }

        info!("compatibility patch applied for: {}", installed);
        *self.state.borrow_mut() = PatchState::Applied { installed };
        Ok(())
    }

    fn install(&self, tag: FeatureTag) -> Result<()> {
        let mut entries = self.entries.borrow_mut();
        match tag {
            FeatureTag::CudaSetDevice => {
                self.config
                    .cudart
                    .validate()
                    .map_err(|reason| ShimError::Install {
                        feature: FeatureTag::CudaSetDevice,
                        reason,
                    })?;
                entries.set_device =
                    SetDevice::Native(NativeSetDevice::new(self.config.cudart.clone()));
            }
            FeatureTag::CudaEmptyCache => {
                self.config
                    .torch_cuda
                    .validate()
                    .map_err(|reason| ShimError::Install {
                        feature: FeatureTag::CudaEmptyCache,
                        reason,
                    })?;
                entries.empty_cache = EmptyCache::Native(NativeEmptyCache::new(
                    self.config.torch_cuda.clone(),
                    Rc::clone(&self.sink),
                ));
            }
            FeatureTag::LoadKeywords => entries.load = Load::Shim,
            FeatureTag::TensorItemScalar => entries.item = Item::Flatten,
        }
        Ok(())
    }

    fn cuda(&self) -> Result<&dyn CudaRuntime> {
        self.binding
            .cuda()
            .ok_or(ShimError::Unsupported("CUDA device control"))
    }

    /// Select the device subsequent native work runs on.
    pub fn set_device(&self, device_id: i64) -> Result<()> {
        match &self.entries.borrow().set_device {
            SetDevice::Binding => self.cuda()?.set_device(device_id),
            SetDevice::Native(native) => native.call(&self.resolver, device_id),
        }
    }

    /// Release cached device memory. When patched and the native function is
    /// unavailable this warns once and otherwise does nothing.
    pub fn empty_cache(&self) -> Result<()> {
        match &self.entries.borrow().empty_cache {
            EmptyCache::Binding => self.cuda()?.empty_cache(),
            EmptyCache::Native(native) => native.call(&self.resolver),
        }
    }

    /// The scalar value of a tensor.
    ///
    /// Patched, a nested single-element result yields its first element in
    /// flattened order, and an empty one yields nil.
    pub fn item(&self, tensor: &B::Tensor) -> Result<Scalar> {
        let item = self.entries.borrow().item;
        match (item, tensor.item()?) {
            (_, ItemValue::Scalar(scalar)) => Ok(scalar),
            (Item::Flatten, nested) => Ok(nested.first_flattened()),
            (Item::Binding, ItemValue::Sequence(_)) => Err(ShimError::Binding(
                "item returned a sequence instead of a scalar".to_string(),
            )),
        }
    }

    /// Deserialize the checkpoint at `source`.
    ///
    /// Bindings with native keyword support receive the options unchanged;
    /// otherwise [`TensorLoader`] does the remapping and gating.
    pub fn load(
        &self,
        source: impl AsRef<Path>,
        options: LoadOptions<B::Tensor>,
    ) -> Result<Value<B::Tensor>> {
        let source = source.as_ref();
        let load = self.entries.borrow().load;
        match load {
            Load::Binding => self.binding.load_with_options(source, &options),
            Load::Shim => TensorLoader::new(&self.binding).load(source, &options),
        }
    }

    /// The device a tensor lives on, as a string-compatible value.
    pub fn device_string(&self, tensor: &B::Tensor) -> Result<DeviceString> {
        let native = tensor.device();
        let device_text = self.entries.borrow().device_text;
        match device_text {
            DeviceText::Canonical => DeviceString::new(DeviceSource::Native(&native)),
            DeviceText::Binding => DeviceString::new(DeviceSource::Tag(&native.describe())),
        }
    }
}
