//! # Capability detection
//!
//! [`FeatureDetector`] inspects a binding and reports which of the
//! patchable capabilities it lacks. Detection has no side effects beyond
//! building one throwaway tensor, and every probe fails safe: if the binding
//! cannot answer a question, the capability is reported missing so the
//! shim's replacement is installed.

use std::collections::BTreeSet;
use std::fmt;

use crate::binding::{Binding, BindingTensor};
use crate::value::ItemValue;

/// Name of the device-remapping keyword of the load entry point.
pub const MAP_LOCATION: &str = "map_location";

/// Name of the type-safety keyword of the load entry point.
pub const WEIGHTS_ONLY: &str = "weights_only";

/// One patchable capability.
///
/// Declaration order is the order patches are reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureTag {
    CudaSetDevice,
    CudaEmptyCache,
    LoadKeywords,
    TensorItemScalar,
}

impl FeatureTag {
    pub const ALL: [FeatureTag; 4] = [
        FeatureTag::CudaSetDevice,
        FeatureTag::CudaEmptyCache,
        FeatureTag::LoadKeywords,
        FeatureTag::TensorItemScalar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureTag::CudaSetDevice => "cuda_set_device",
            FeatureTag::CudaEmptyCache => "cuda_empty_cache",
            FeatureTag::LoadKeywords => "load_keywords",
            FeatureTag::TensorItemScalar => "tensor_item_scalar",
        }
    }
}

impl fmt::Display for FeatureTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordered set of feature tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureSet(BTreeSet<FeatureTag>);

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: FeatureTag) -> bool {
        self.0.insert(tag)
    }

    pub fn contains(&self, tag: FeatureTag) -> bool {
        self.0.contains(&tag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = FeatureTag> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<FeatureTag> for FeatureSet {
    fn from_iter<I: IntoIterator<Item = FeatureTag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, tag) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{tag}")?;
        }
        Ok(())
    }
}

/// Reports which capabilities a binding is missing.
pub struct FeatureDetector<'a, B> {
    binding: &'a B,
}

impl<'a, B: Binding> FeatureDetector<'a, B> {
    pub fn new(binding: &'a B) -> Self {
        Self { binding }
    }

    /// The set of missing capabilities.
    pub fn detect(&self) -> FeatureSet {
        FeatureTag::ALL
            .into_iter()
            .filter(|tag| !self.is_supported(*tag))
            .collect()
    }

    pub fn is_supported(&self, tag: FeatureTag) -> bool {
        match tag {
            FeatureTag::CudaSetDevice => self
                .binding
                .cuda()
                .is_some_and(|cuda| cuda.has_set_device()),
            FeatureTag::CudaEmptyCache => self
                .binding
                .cuda()
                .is_some_and(|cuda| cuda.has_empty_cache()),
            FeatureTag::LoadKeywords => self.load_accepts_keywords(),
            FeatureTag::TensorItemScalar => self.item_returns_scalar(),
        }
    }

    /// Both keywords must be declared as keyword parameters; positional
    /// parameters with the same names do not count.
    fn load_accepts_keywords(&self) -> bool {
        let Some(parameters) = self.binding.load_parameters() else {
            return false;
        };
        let has_keyword = |name: &str| {
            parameters
                .iter()
                .any(|parameter| parameter.is_keyword() && parameter.name == name)
        };
        has_keyword(MAP_LOCATION) && has_keyword(WEIGHTS_ONLY)
    }

    fn item_returns_scalar(&self) -> bool {
        let value = self
            .binding
            .probe_tensor()
            .and_then(|tensor| tensor.item());
        match value {
            Ok(ItemValue::Scalar(scalar)) => scalar.is_numeric_or_bool(),
            Ok(ItemValue::Sequence(_)) => false,
            Err(err) => {
                tracing::debug!("scalar extraction probe failed: {}", err);
                false
            }
        }
    }
}
