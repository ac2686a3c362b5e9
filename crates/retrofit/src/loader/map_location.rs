use std::fmt;
use std::rc::Rc;

use crate::binding::{Binding, BindingTensor};
use crate::device::{Device, DeviceRef, device_of};
use crate::error::{Result, ShimError};
use crate::value::{Scalar, Value};

/// Signature of a remapping callable: `(tensor, source device tag)`.
///
/// Returning `Value::Tensor` replaces the tensor, `nil` leaves it where it is,
/// and anything else is a contract violation.
pub type MapFn<T> = dyn Fn(&T, &str) -> Result<Value<T>>;

/// How tensor devices are rewritten while loading.
pub enum MapLocation<T> {
    /// Move every tensor to one device.
    Device(DeviceRef),
    /// Look up each tensor's current device tag among the keys and apply
    /// the matching target; unmatched tensors stay put.
    Mapping(Vec<(DeviceRef, MapLocation<T>)>),
    Callable(Rc<MapFn<T>>),
}

impl<T> MapLocation<T> {
    pub fn device(device: impl Into<DeviceRef>) -> Self {
        MapLocation::Device(device.into())
    }

    pub fn mapping<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<DeviceRef>,
        V: Into<MapLocation<T>>,
    {
        MapLocation::Mapping(
            entries
                .into_iter()
                .map(|(key, target)| (key.into(), target.into()))
                .collect(),
        )
    }

    pub fn callable(f: impl Fn(&T, &str) -> Result<Value<T>> + 'static) -> Self {
        MapLocation::Callable(Rc::new(f))
    }

    /// The target for `tag` in a mapping, first match wins.
    fn lookup<'a>(
        entries: &'a [(DeviceRef, MapLocation<T>)],
        tag: &str,
    ) -> Option<&'a MapLocation<T>> {
        entries
            .iter()
            .find(|(key, _)| key.lookup_tag() == tag)
            .map(|(_, target)| target)
    }
}

impl<T> Clone for MapLocation<T> {
    fn clone(&self) -> Self {
        match self {
            MapLocation::Device(device) => MapLocation::Device(device.clone()),
            MapLocation::Mapping(entries) => MapLocation::Mapping(entries.clone()),
            MapLocation::Callable(f) => MapLocation::Callable(Rc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for MapLocation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapLocation::Device(device) => f.debug_tuple("Device").field(device).finish(),
            MapLocation::Mapping(entries) => f.debug_tuple("Mapping").field(entries).finish(),
            MapLocation::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

impl<T> From<Device> for MapLocation<T> {
    fn from(device: Device) -> Self {
        MapLocation::Device(device.into())
    }
}

impl<T> From<&str> for MapLocation<T> {
    fn from(tag: &str) -> Self {
        MapLocation::Device(tag.into())
    }
}

impl<T> From<DeviceRef> for MapLocation<T> {
    fn from(device: DeviceRef) -> Self {
        MapLocation::Device(device)
    }
}

/// Resolve a device reference through the binding.
///
/// A blank tag is not a device reference at all and is reported as an
/// unsupported `map_location` rather than a device the binding rejected.
pub(crate) fn normalize_device<B: Binding>(binding: &B, device: &DeviceRef) -> Result<Device> {
    match device {
        DeviceRef::Device(device) => Ok(device.clone()),
        DeviceRef::Tag(tag) if tag.trim().is_empty() => {
            Err(ShimError::UnsupportedMapLocation(format!("{tag:?}")))
        }
        DeviceRef::Tag(tag) => binding.parse_device(tag),
    }
}

/// The single device a `map_location` sends everything to, if there is one.
///
/// A mapping qualifies only when all of its directly device-valued targets
/// agree on one device; callables and nested mappings never qualify.
pub(crate) fn single_device<B: Binding>(
    binding: &B,
    map_location: &MapLocation<B::Tensor>,
) -> Result<Option<Device>> {
    match map_location {
        MapLocation::Device(device) => normalize_device(binding, device).map(Some),
        MapLocation::Mapping(entries) => {
            let mut devices: Vec<Device> = Vec::new();
            for (_, target) in entries {
                let MapLocation::Device(device) = target else {
                    continue;
                };
                let Ok(device) = normalize_device(binding, device) else {
                    continue;
                };
                if !devices.contains(&device) {
                    devices.push(device);
                }
            }
            Ok(match devices.as_slice() {
                [device] => Some(device.clone()),
                _ => None,
            })
        }
        MapLocation::Callable(_) => Ok(None),
    }
}

/// Remap one tensor.
pub(crate) fn map_tensor<B: Binding>(
    binding: &B,
    tensor: B::Tensor,
    map_location: &MapLocation<B::Tensor>,
) -> Result<B::Tensor> {
    match map_location {
        MapLocation::Device(device) => {
            let device = normalize_device(binding, device)?;
            tensor.to_device(&device)
        }
        MapLocation::Mapping(entries) => {
            let tag = device_of(&tensor.device())?.tag();
            match MapLocation::lookup(entries, &tag) {
                Some(target) => map_tensor(binding, tensor, target),
                None => Ok(tensor),
            }
        }
        MapLocation::Callable(f) => {
            let tag = device_of(&tensor.device())?.tag();
            match f(&tensor, &tag)? {
                Value::Tensor(mapped) => Ok(mapped),
                Value::Scalar(Scalar::Nil) => Ok(tensor),
                other => Err(ShimError::MapLocationContract {
                    type_name: other.type_name(),
                }),
            }
        }
    }
}

/// Remap every tensor in `value`, keys included.
pub(crate) fn apply_map_location<B: Binding>(
    binding: &B,
    value: Value<B::Tensor>,
    map_location: &MapLocation<B::Tensor>,
) -> Result<Value<B::Tensor>> {
    value.try_map_tensors(&mut |tensor| map_tensor(binding, tensor, map_location))
}
