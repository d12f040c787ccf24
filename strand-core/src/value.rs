//! Dynamic value type flowing through the plug graph.
//!
//! Plugs are typed at construction time: every plug declares a [`ValueType`]
//! and only carries [`Value`]s of that type. At evaluation time the engine
//! trusts the graph and moves `Value`s around dynamically; the typed
//! accessors (`as_int` and friends) are for node implementations that know
//! what they asked for.
//!
//! Values participate in two engine concerns beyond data flow:
//!
//! - content hashing: every value folds itself into a [`ContentHasher`] so
//!   that identical content always yields identical fingerprints, and
//! - cache accounting: every value reports an approximate memory footprint
//!   used by the byte-budgeted compute cache.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::CacheCost;
use crate::error::TypeError;
use crate::hash::ContentHasher;

/// Runtime value carried by plugs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Shared float array. Bulk data is reference-counted so cache hits and
    /// plug reads never copy the payload.
    FloatVec(Arc<Vec<f64>>),
}

/// Type identifier for plug values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Int,
    /// 64-bit float.
    Float,
    /// UTF-8 string.
    String,
    /// Shared float array.
    FloatVec,
}

impl Value {
    /// Returns the type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::String(_) => ValueType::String,
            Value::FloatVec(_) => ValueType::FloatVec,
        }
    }

    /// Attempts to extract a bool.
    pub fn as_bool(&self) -> Result<bool, TypeError> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::Bool, other.value_type())),
        }
    }

    /// Attempts to extract an i64.
    pub fn as_int(&self) -> Result<i64, TypeError> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::Int, other.value_type())),
        }
    }

    /// Attempts to extract an f64.
    pub fn as_float(&self) -> Result<f64, TypeError> {
        match self {
            Value::Float(v) => Ok(*v),
            other => Err(TypeError::expected(ValueType::Float, other.value_type())),
        }
    }

    /// Attempts to extract a string slice.
    pub fn as_str(&self) -> Result<&str, TypeError> {
        match self {
            Value::String(v) => Ok(v),
            other => Err(TypeError::expected(ValueType::String, other.value_type())),
        }
    }

    /// Attempts to extract a shared float array.
    pub fn as_float_vec(&self) -> Result<&Arc<Vec<f64>>, TypeError> {
        match self {
            Value::FloatVec(v) => Ok(v),
            other => Err(TypeError::expected(ValueType::FloatVec, other.value_type())),
        }
    }

    /// Folds this value into a content hasher.
    ///
    /// A discriminant tag precedes the payload so that, for example,
    /// `Int(1)` and `Bool(true)` never collide.
    pub fn fold_into(&self, hasher: &mut ContentHasher) {
        match self {
            Value::Bool(v) => {
                hasher.append_u8(0);
                hasher.append_bool(*v);
            }
            Value::Int(v) => {
                hasher.append_u8(1);
                hasher.append_i64(*v);
            }
            Value::Float(v) => {
                hasher.append_u8(2);
                hasher.append_f64(*v);
            }
            Value::String(v) => {
                hasher.append_u8(3);
                hasher.append_str(v);
            }
            Value::FloatVec(v) => {
                hasher.append_u8(4);
                hasher.append_u64(v.len() as u64);
                for x in v.iter() {
                    hasher.append_f64(*x);
                }
            }
        }
    }

    /// Approximate memory footprint in bytes, including heap payloads.
    pub fn memory_usage(&self) -> usize {
        let heap = match self {
            Value::String(v) => v.capacity(),
            Value::FloatVec(v) => v.capacity() * std::mem::size_of::<f64>(),
            _ => 0,
        };
        std::mem::size_of::<Value>() + heap
    }
}

impl ValueType {
    /// The default value a plug of this type resolves to when nothing has
    /// been stored or computed.
    pub fn default_value(&self) -> Value {
        match self {
            ValueType::Bool => Value::Bool(false),
            ValueType::Int => Value::Int(0),
            ValueType::Float => Value::Float(0.0),
            ValueType::String => Value::String(String::new()),
            ValueType::FloatVec => Value::FloatVec(Arc::new(Vec::new())),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => write!(f, "bool"),
            ValueType::Int => write!(f, "int"),
            ValueType::Float => write!(f, "float"),
            ValueType::String => write!(f, "string"),
            ValueType::FloatVec => write!(f, "float[]"),
        }
    }
}

impl CacheCost for Value {
    fn cost(&self) -> usize {
        self.memory_usage()
    }
}

// Convenience From impls
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::FloatVec(Arc::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        assert_eq!(Value::Int(7).as_int().unwrap(), 7);
        assert_eq!(Value::Float(1.5).as_float().unwrap(), 1.5);
        assert_eq!(Value::from("hi").as_str().unwrap(), "hi");

        let err = Value::Int(7).as_float().unwrap_err();
        assert_eq!(err.expected, ValueType::Float);
        assert_eq!(err.got, ValueType::Int);
    }

    #[test]
    fn defaults_match_declared_type() {
        for ty in [
            ValueType::Bool,
            ValueType::Int,
            ValueType::Float,
            ValueType::String,
            ValueType::FloatVec,
        ] {
            assert_eq!(ty.default_value().value_type(), ty);
        }
    }

    #[test]
    fn hash_folding_distinguishes_types() {
        let mut a = ContentHasher::new();
        Value::Int(1).fold_into(&mut a);
        let mut b = ContentHasher::new();
        Value::Bool(true).fold_into(&mut b);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn memory_usage_counts_heap_payloads() {
        let small = Value::Int(0);
        let big = Value::from(vec![0.0; 1024]);
        assert!(big.memory_usage() > small.memory_usage() + 8000);
    }
}
