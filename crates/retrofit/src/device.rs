//! # Devices and their textual form
//!
//! Bindings disagree on how a device prints: some expose a dedicated
//! backend accessor returning the canonical `"cuda:0"` form, others only a
//! generic debug-ish conversion. Everything in this module funnels those
//! differences into a single structured [`Device`] and a string-compatible
//! [`DeviceString`] wrapper.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;

use crate::error::{Result, ShimError};

/// A compute target: a backend type tag and an optional ordinal.
///
/// Two devices are equal iff both the type and the index match, so `cuda`
/// and `cuda:0` are distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Device {
    kind: String,
    index: Option<usize>,
}

impl Device {
    pub fn new(kind: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            kind: kind.into(),
            index,
        }
    }

    pub fn cpu() -> Self {
        Self::new("cpu", None)
    }

    pub fn cuda(index: usize) -> Self {
        Self::new("cuda", Some(index))
    }

    /// Parse `"cpu"`, `"cuda"`, `"cuda:1"` and friends.
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let (kind, index) = match tag.split_once(':') {
            Some((kind, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| ShimError::UnknownDevice(tag.to_string()))?;
                (kind, Some(index))
            }
            None => (tag, None),
        };

        let valid_kind = !kind.is_empty()
            && kind
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_kind {
            return Err(ShimError::UnknownDevice(tag.to_string()));
        }

        Ok(Self::new(kind.to_ascii_lowercase(), index))
    }

    /// The backend type tag, e.g. `"cuda"`.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// `type` or `type:index`.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{}:{}", self.kind, index),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// A device reference as application code writes it: a structured device
/// or a bare tag such as `"cuda:0"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRef {
    Device(Device),
    Tag(String),
}

impl DeviceRef {
    /// The comparison form used for `map_location` keys.
    ///
    /// Devices and parseable tags render as `type[:index]`; a tag that does
    /// not parse is used verbatim.
    pub fn lookup_tag(&self) -> String {
        match self {
            DeviceRef::Device(device) => device.tag(),
            DeviceRef::Tag(tag) => Device::parse(tag)
                .map(|device| device.tag())
                .unwrap_or_else(|_| tag.clone()),
        }
    }
}

impl From<Device> for DeviceRef {
    fn from(device: Device) -> Self {
        DeviceRef::Device(device)
    }
}

impl From<&str> for DeviceRef {
    fn from(tag: &str) -> Self {
        DeviceRef::Tag(tag.to_string())
    }
}

impl From<String> for DeviceRef {
    fn from(tag: String) -> Self {
        DeviceRef::Tag(tag)
    }
}

/// A binding's own device object.
///
/// Only [`describe`](NativeDevice::describe) is mandatory; the accessors
/// return `None` when the binding does not offer them.
pub trait NativeDevice {
    /// The backend's canonical string, if the binding exposes one.
    fn backend_str(&self) -> Option<String> {
        None
    }

    /// The backend type tag, if the binding exposes one.
    fn kind(&self) -> Option<String> {
        None
    }

    fn index(&self) -> Option<usize> {
        None
    }

    /// Whatever generic string conversion the binding offers.
    fn describe(&self) -> String;
}

impl NativeDevice for Device {
    fn backend_str(&self) -> Option<String> {
        Some(self.tag())
    }

    fn kind(&self) -> Option<String> {
        Some(self.kind.clone())
    }

    fn index(&self) -> Option<usize> {
        self.index
    }

    fn describe(&self) -> String {
        self.tag()
    }
}

/// Textual form of a native device: the backend accessor when present,
/// otherwise the generic conversion.
pub fn canonical_device_string(device: &dyn NativeDevice) -> String {
    device.backend_str().unwrap_or_else(|| device.describe())
}

/// Where a [`DeviceString`] is built from.
pub enum DeviceSource<'a> {
    Device(Device),
    Tag(&'a str),
    Native(&'a dyn NativeDevice),
}

/// A device identifier that behaves like a plain string.
///
/// Older application code compares devices textually (`device == "cuda:0"`);
/// this wrapper keeps that working while still exposing the structured
/// [`kind`](DeviceString::kind) and [`index`](DeviceString::index).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceString {
    text: String,
    device: Device,
}

impl DeviceString {
    pub fn new(source: DeviceSource<'_>) -> Result<Self> {
        match source {
            DeviceSource::Device(device) => Ok(Self::from_device(device)),
            DeviceSource::Tag(tag) => Device::parse(tag).map(Self::from_device),
            DeviceSource::Native(native) => Self::from_native(native),
        }
    }

    pub fn from_device(device: Device) -> Self {
        Self {
            text: device.tag(),
            device,
        }
    }

    /// A native device exposing both a backend string and a type is taken
    /// as-is; anything else is re-parsed from its canonical string.
    pub fn from_native(native: &dyn NativeDevice) -> Result<Self> {
        match (native.backend_str(), native.kind()) {
            (Some(text), Some(kind)) => Ok(Self {
                text,
                device: Device::new(kind, native.index()),
            }),
            _ => {
                let device = Device::parse(&canonical_device_string(native))?;
                Ok(Self::from_device(device))
            }
        }
    }

    pub fn kind(&self) -> &str {
        self.device.kind()
    }

    pub fn index(&self) -> Option<usize> {
        self.device.index()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_device(self) -> Device {
        self.device
    }
}

impl Deref for DeviceString {
    type Target = str;

    fn deref(&self) -> &str {
        &self.text
    }
}

impl AsRef<str> for DeviceString {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl Borrow<str> for DeviceString {
    fn borrow(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for DeviceString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl PartialEq<str> for DeviceString {
    fn eq(&self, other: &str) -> bool {
        self.text == other
    }
}

impl PartialEq<&str> for DeviceString {
    fn eq(&self, other: &&str) -> bool {
        self.text == *other
    }
}

impl PartialEq<String> for DeviceString {
    fn eq(&self, other: &String) -> bool {
        &self.text == other
    }
}

/// Resolve a native device into a structured [`Device`].
pub fn device_of(native: &dyn NativeDevice) -> Result<Device> {
    DeviceString::from_native(native).map(DeviceString::into_device)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OpaqueDevice(&'static str);

    impl NativeDevice for OpaqueDevice {
        fn describe(&self) -> String {
            self.0.to_string()
        }
    }

    struct AccessorDevice;

    impl NativeDevice for AccessorDevice {
        fn backend_str(&self) -> Option<String> {
            Some("cuda:3".to_string())
        }

        fn kind(&self) -> Option<String> {
            Some("cuda".to_string())
        }

        fn index(&self) -> Option<usize> {
            Some(3)
        }

        fn describe(&self) -> String {
            "#<Device 0x7f>".to_string()
        }
    }

    struct StringOnlyDevice;

    impl NativeDevice for StringOnlyDevice {
        fn backend_str(&self) -> Option<String> {
            Some("cuda:1".to_string())
        }

        fn describe(&self) -> String {
            "#<Device 0x7f>".to_string()
        }
    }

    #[test]
    fn test_backend_string_without_type_accessor() {
        let device = DeviceString::from_native(&StringOnlyDevice).unwrap();
        assert_eq!(device, "cuda:1");
        assert_eq!(device.index(), Some(1));
        assert_eq!(device_of(&StringOnlyDevice).unwrap(), Device::cuda(1));
    }

    #[test]
    fn test_parse() {
        assert_eq!(Device::parse("cpu").unwrap(), Device::cpu());
        assert_eq!(Device::parse("cuda:1").unwrap(), Device::cuda(1));
        assert_eq!(Device::parse("CUDA").unwrap(), Device::new("cuda", None));
        assert!(Device::parse("cuda:x").is_err());
        assert!(Device::parse("").is_err());
        assert!(Device::parse("#<Device>").is_err());
    }

    #[test]
    fn test_equality_needs_matching_index() {
        assert_ne!(Device::new("cuda", None), Device::cuda(0));
        assert_eq!(Device::cuda(0), Device::new("cuda", Some(0)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Device::cpu().to_string(), "cpu");
        assert_eq!(Device::cuda(2).to_string(), "cuda:2");
    }

    #[test]
    fn test_lookup_tag() {
        assert_eq!(DeviceRef::from(Device::cuda(0)).lookup_tag(), "cuda:0");
        assert_eq!(DeviceRef::from("cuda:0").lookup_tag(), "cuda:0");
        assert_eq!(DeviceRef::from(" cpu").lookup_tag(), "cpu");
        assert_eq!(DeviceRef::from("CUDA:1").lookup_tag(), "cuda:1");
        assert_eq!(DeviceRef::from("#<Device>").lookup_tag(), "#<Device>");
    }

    #[test]
    fn test_canonical_prefers_backend_accessor() {
        assert_eq!(canonical_device_string(&AccessorDevice), "cuda:3");
        assert_eq!(canonical_device_string(&OpaqueDevice("cpu")), "cpu");
    }

    #[test]
    fn test_device_string_compares_as_text() {
        let device = DeviceString::new(DeviceSource::Tag("cuda:1")).unwrap();
        assert_eq!(device, "cuda:1");
        assert_eq!(device, "cuda:1".to_string());
        assert_eq!(device.kind(), "cuda");
        assert_eq!(device.index(), Some(1));
        assert!(device.starts_with("cuda"));
    }

    #[test]
    fn test_device_string_from_native() {
        let accessor = DeviceString::new(DeviceSource::Native(&AccessorDevice)).unwrap();
        assert_eq!(accessor.as_str(), "cuda:3");
        assert_eq!(accessor.index(), Some(3));

        let opaque = DeviceString::new(DeviceSource::Native(&OpaqueDevice("cuda:2"))).unwrap();
        assert_eq!(opaque, "cuda:2");
        assert_eq!(opaque.device(), &Device::cuda(2));

        assert!(DeviceString::new(DeviceSource::Native(&OpaqueDevice("#<Device>"))).is_err());
    }

    #[test]
    fn test_device_of() {
        assert_eq!(device_of(&Device::cpu()).unwrap(), Device::cpu());
        assert_eq!(device_of(&AccessorDevice).unwrap(), Device::cuda(3));
    }
}
