//! # Retrofit
//!
//! A drop-in compatibility shim that lets code written against a current
//! tensor library binding run on an older build of that binding.
//!
//! ## Overview
//!
//! Older bindings lack a handful of capabilities that training code takes
//! for granted: selecting the active GPU, clearing the device memory cache,
//! loading a checkpoint with device remapping and content gating, and
//! getting a plain scalar out of a one-element tensor. Retrofit detects
//! which of these a binding is missing and serves exactly those from its
//! own implementation, leaving everything the binding already does alone.
//!
//! Key components include:
//!
//! - Capability detection that fails safe toward patching
//! - A one-shot, idempotent patch applier
//! - Runtime resolution of CUDA and libtorch functions via dlopen
//! - A checkpoint loader with `map_location` and `weights_only`
//! - String-compatible device identifiers
//!
//! ## Architecture
//!
//! ### Binding Traits
//!
//! The `Binding` and `BindingTensor` traits describe the operations the shim
//! needs from the wrapped library. Detection and patching only ever go
//! through these traits, so any library with an adapter can be retrofitted.
//!
//! ### Native Functions
//!
//! Device selection and cache clearing are backed by C functions found at
//! runtime. Candidate libraries are tried in order (an environment
//! override first), and a function that cannot be found only becomes an
//! error when it is called. Device selection then fails on every call;
//! cache clearing warns once and does nothing.
//!
//! ### Values
//!
//! Deserialized checkpoints are `Value` graphs: scalars, tensors, sequences,
//! mappings and opaque objects. Remapping and gating walk the graph
//! recursively, mapping keys included.
//!
//! ## Features
//!
//! - **candle** - Enables the candle binding adapter
//!
//! ## Threading
//!
//! A `Shim` is single-threaded: it holds its state in `RefCell`s and shares
//! its warning sink through `Rc`.
//!

mod shim;

pub mod binding;
pub mod config;
pub mod device;
pub mod error;
pub mod feature;
pub mod loader;
pub mod native;
pub mod value;
pub mod warning;

pub use config::{NativeLibrary, ShimConfig};
pub use device::{Device, DeviceString, canonical_device_string};
pub use error::{Result, ShimError};
pub use feature::{FeatureSet, FeatureTag};
pub use loader::{LoadOptions, MapLocation};
pub use shim::{PatchState, Shim};
pub use value::{Scalar, Value};
