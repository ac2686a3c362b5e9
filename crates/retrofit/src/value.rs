//! # Value graphs
//!
//! The shape a deserialized checkpoint takes: primitive scalars and tensors
//! nested inside ordered sequences and mappings. Objects the shim does not
//! understand are kept as [`Opaque`] leaves so `weights_only` validation can
//! name them.
//!
//! Traversal is explicit: [`Value::accept`] drives a [`Visitor`] over every
//! leaf, and [`Value::try_map_tensors`] rebuilds the graph with each tensor
//! replaced, keeping sequence order and mapping entry order.

use std::fmt;

/// A primitive leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Nil => "nil",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Str(_) => "str",
        }
    }

    /// Numeric or boolean, the only acceptable results of a scalar extraction.
    pub fn is_numeric_or_bool(&self) -> bool {
        matches!(self, Scalar::Bool(_) | Scalar::Int(_) | Scalar::Float(_))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Scalar::Nil)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Nil => write!(f, "nil"),
            Scalar::Bool(value) => write!(f, "{value}"),
            Scalar::Int(value) => write!(f, "{value}"),
            Scalar::Float(value) => write!(f, "{value}"),
            Scalar::Str(value) => write!(f, "{value:?}"),
        }
    }
}

/// An object the binding deserialized but the shim has no model for.
#[derive(Debug, Clone, PartialEq)]
pub struct Opaque {
    pub type_name: String,
    pub repr: String,
}

impl Opaque {
    pub fn new(type_name: impl Into<String>, repr: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            repr: repr.into(),
        }
    }
}

/// A recursively nested deserialization result over tensors of type `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<T> {
    Scalar(Scalar),
    Tensor(T),
    Sequence(Vec<Value<T>>),
    /// Entries in insertion order; keys are values too.
    Mapping(Vec<(Value<T>, Value<T>)>),
    Opaque(Opaque),
}

/// Callbacks for every leaf reached by [`Value::accept`].
///
/// Containers are walked by `accept` itself; mapping keys are visited before
/// their values.
pub trait Visitor<T> {
    type Error;

    fn visit_scalar(&mut self, _scalar: &Scalar) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_tensor(&mut self, _tensor: &T) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_opaque(&mut self, _opaque: &Opaque) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl<T> Value<T> {
    pub fn nil() -> Self {
        Value::Scalar(Scalar::Nil)
    }

    pub fn str(value: impl Into<String>) -> Self {
        Value::Scalar(Scalar::Str(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Value::Scalar(Scalar::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Value::Scalar(Scalar::Float(value))
    }

    pub fn opaque(type_name: impl Into<String>, repr: impl Into<String>) -> Self {
        Value::Opaque(Opaque::new(type_name, repr))
    }

    /// Human-readable type of this node, used in contract violations.
    pub fn type_name(&self) -> String {
        match self {
            Value::Scalar(scalar) => scalar.type_name().to_string(),
            Value::Tensor(_) => "Tensor".to_string(),
            Value::Sequence(_) => "Sequence".to_string(),
            Value::Mapping(_) => "Mapping".to_string(),
            Value::Opaque(opaque) => opaque.type_name.clone(),
        }
    }

    pub fn as_tensor(&self) -> Option<&T> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    /// Look up a mapping entry by string key.
    pub fn get(&self, key: &str) -> Option<&Value<T>> {
        match self {
            Value::Mapping(entries) => entries.iter().find_map(|(k, v)| match k {
                Value::Scalar(Scalar::Str(k)) if k == key => Some(v),
                _ => None,
            }),
            _ => None,
        }
    }

    /// Walk every leaf depth-first.
    pub fn accept<V: Visitor<T>>(&self, visitor: &mut V) -> Result<(), V::Error> {
        match self {
            Value::Scalar(scalar) => visitor.visit_scalar(scalar),
            Value::Tensor(tensor) => visitor.visit_tensor(tensor),
            Value::Opaque(opaque) => visitor.visit_opaque(opaque),
            Value::Sequence(items) => items.iter().try_for_each(|item| item.accept(visitor)),
            Value::Mapping(entries) => entries.iter().try_for_each(|(key, value)| {
                key.accept(visitor)?;
                value.accept(visitor)
            }),
        }
    }

    /// Rebuild the graph with every tensor (keys included) passed through `f`.
    pub fn try_map_tensors<U, E, F>(self, f: &mut F) -> Result<Value<U>, E>
    where
        F: FnMut(T) -> Result<U, E>,
    {
        Ok(match self {
            Value::Scalar(scalar) => Value::Scalar(scalar),
            Value::Opaque(opaque) => Value::Opaque(opaque),
            Value::Tensor(tensor) => Value::Tensor(f(tensor)?),
            Value::Sequence(items) => Value::Sequence(
                items
                    .into_iter()
                    .map(|item| item.try_map_tensors(f))
                    .collect::<Result<_, E>>()?,
            ),
            Value::Mapping(entries) => Value::Mapping(
                entries
                    .into_iter()
                    .map(|(key, value)| Ok((key.try_map_tensors(f)?, value.try_map_tensors(f)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }
}

impl<T> From<Scalar> for Value<T> {
    fn from(scalar: Scalar) -> Self {
        Value::Scalar(scalar)
    }
}

/// What a binding's scalar extraction hands back.
///
/// Well-behaved bindings return [`ItemValue::Scalar`]; some return the
/// tensor's contents as nested sequences instead.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Scalar(Scalar),
    Sequence(Vec<ItemValue>),
}

impl ItemValue {
    /// The first scalar in depth-first order, or nil when there is none.
    pub fn first_flattened(self) -> Scalar {
        self.first_flattened_opt().unwrap_or(Scalar::Nil)
    }

    fn first_flattened_opt(self) -> Option<Scalar> {
        match self {
            ItemValue::Scalar(scalar) => Some(scalar),
            ItemValue::Sequence(items) => items.into_iter().find_map(ItemValue::first_flattened_opt),
        }
    }
}
