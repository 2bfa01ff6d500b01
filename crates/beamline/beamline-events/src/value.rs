use crate::peak::PeakList;
use serde::{Deserialize, Serialize};

/// A tagged-variant payload element.
///
/// `ProcessedResult`, `FeedbackDict`, and the broadcast message body are all
/// heterogeneous string-keyed maps of these. A single tagged enum (rather
/// than one map per concrete type) is what lets the wire codec serialize
/// them uniformly — see the broadcast payload polymorphism design note.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// A 1D vector of `f32`, e.g. a radial profile.
    FloatArray(Vec<f32>),
    /// A 2D array flattened row-major, carrying its own shape — the Rust
    /// analogue of the wire's numpy-typed `{nd, type, kind, shape, data}`
    /// encoding.
    Array2 {
        shape: (usize, usize),
        data: Vec<f32>,
    },
    PeakList(PeakList),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<PeakList> for Value {
    fn from(v: PeakList) -> Self {
        Value::PeakList(v)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::FloatArray(v)
    }
}
