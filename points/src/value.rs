//! Tagged scalar values and slot kinds.
//!
//! Every live point value is either a boolean or a numeric (`f64`); the
//! slot that holds it carries a fixed [`Kind`] tag assigned at device
//! initialization. The store's type guard is an exhaustive match over
//! `(Kind, Value)`; see [`crate::store::PointStore::set`].

use core::fmt;

use serde::{Deserialize, Serialize};

/// A live point value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Numeric(f64),
}

impl Value {
    /// The kind tag matching this value.
    #[inline]
    pub const fn kind(&self) -> Kind {
        match self {
            Value::Bool(_) => Kind::Bool,
            Value::Numeric(_) => Kind::Numeric,
        }
    }

    /// Truthiness view: numerics are `true` iff nonzero.
    #[inline]
    pub fn as_bool(&self) -> bool {
        match *self {
            Value::Bool(b) => b,
            Value::Numeric(n) => n != 0.0,
        }
    }

    /// Numeric view: booleans read as `0.0` / `1.0`.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match *self {
            Value::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Numeric(n) => n,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Numeric(n) => write!(f, "{n}"),
        }
    }
}

/// The fixed kind tag of a slot, assigned at device initialization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Kind {
    Bool,
    Numeric,
}

impl Kind {
    /// Type-appropriate zero: `false` for [`Kind::Bool`], `0.0` for
    /// [`Kind::Numeric`].
    #[inline]
    pub const fn zero(&self) -> Value {
        match self {
            Kind::Bool => Value::Bool(false),
            Kind::Numeric => Value::Numeric(0.0),
        }
    }
}

/// Who performed a store write.
///
/// The override controller reacts only to [`ValueSource::RemoteWrite`];
/// generator ticks commit as [`ValueSource::Simulation`] and never trigger
/// override transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueSource {
    /// Operator/UI write through the host API.
    Manual,
    /// Generator tick.
    Simulation,
    /// Protocol-originated write from an external Modbus client.
    RemoteWrite,
}
