//! Constant values carried by IR constants.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A compile-time constant.
///
/// Floats compare and hash by bit pattern so that values can key an
/// interning table. `-0.0` is folded to `0.0` by [`Value::canonical`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Float(f64),
    Int(i64),
    Bool(bool),
    /// The zero of any type, including composites.
    Zero,
    /// Struct fields in declaration order, or template elements.
    Tuple(Vec<Value>),
}

impl Value {
    /// Normalize representations that would otherwise intern separately.
    pub fn canonical(self) -> Self {
        match self {
            Value::Float(v) if v == 0.0 => Value::Float(0.0),
            Value::Tuple(items) => {
                let items: Vec<Value> = items.into_iter().map(Value::canonical).collect();
                if !items.is_empty() && items.iter().all(Value::is_zero) {
                    Value::Zero
                } else {
                    Value::Tuple(items)
                }
            }
            v => v,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Float(v) => *v == 0.0,
            Value::Int(v) => *v == 0,
            Value::Bool(_) => false,
            Value::Zero => true,
            Value::Tuple(items) => items.iter().all(Value::is_zero),
        }
    }

    pub fn is_one(&self) -> bool {
        match self {
            Value::Float(v) => *v == 1.0,
            Value::Int(v) => *v == 1,
            _ => false,
        }
    }

    /// Numeric value as `f64`, if this is a scalar number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Element `i` of an aggregate constant. `Zero` projects to `Zero`.
    pub fn element(&self, i: usize) -> Option<Value> {
        match self {
            Value::Zero => Some(Value::Zero),
            Value::Tuple(items) => items.get(i).cloned(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Zero, Value::Zero) => true,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Float(v) => v.to_bits().hash(state),
            Value::Int(v) => v.hash(state),
            Value::Bool(v) => v.hash(state),
            Value::Zero => {}
            Value::Tuple(items) => items.hash(state),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v as f64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
