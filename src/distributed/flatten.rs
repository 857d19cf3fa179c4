//! Type-preserving flattening of non-tensor state values.
//!
//! Collectives move fixed-shape tensors, but optimizer state also holds plain
//! scalars and nested containers. Those are flattened into a one-dimensional
//! f64 tensor for transport, paired with a [`TypeSignature`] recording the
//! original structure so the receiving side can rebuild the exact value.
//!
//! Leaf encoding in the f64 lanes: floats travel as-is, integers as their raw
//! 64-bit pattern (lossless for all `i64`), booleans as 0.0/1.0. The signature
//! says how to reinterpret each lane, so no leaf loses information in transit.

use crate::error::{Error, Result};
use crate::optimizer::state::{ScalarValue, Value};
use crate::tensor::Tensor;

/// Scalar leaf kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Float,
    Int,
    Bool,
}

/// Container kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Tuple,
}

/// Recursive descriptor of a value's structure, built once before flattening
/// and required to invert it losslessly.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSignature {
    Scalar(ScalarKind),
    Container(ContainerKind, Vec<TypeSignature>),
}

impl TypeSignature {
    /// Build the signature of a value by recursive inspection.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Scalar(ScalarValue::Float(_)) => TypeSignature::Scalar(ScalarKind::Float),
            Value::Scalar(ScalarValue::Int(_)) => TypeSignature::Scalar(ScalarKind::Int),
            Value::Scalar(ScalarValue::Bool(_)) => TypeSignature::Scalar(ScalarKind::Bool),
            Value::List(items) => TypeSignature::Container(
                ContainerKind::List,
                items.iter().map(TypeSignature::of).collect(),
            ),
            Value::Tuple(items) => TypeSignature::Container(
                ContainerKind::Tuple,
                items.iter().map(TypeSignature::of).collect(),
            ),
        }
    }

    /// Number of scalar leaves described by this signature.
    pub fn leaf_count(&self) -> usize {
        match self {
            TypeSignature::Scalar(_) => 1,
            TypeSignature::Container(_, items) => items.iter().map(|s| s.leaf_count()).sum(),
        }
    }
}

/// Flatten a value into a one-dimensional f64 staging tensor, depth-first.
pub fn flatten(value: &Value) -> Tensor {
    let mut lanes = Vec::new();
    push_leaves(value, &mut lanes);
    Tensor::from_slice(&lanes, &[lanes.len()])
}

fn push_leaves(value: &Value, lanes: &mut Vec<f64>) {
    match value {
        Value::Scalar(ScalarValue::Float(v)) => lanes.push(*v),
        Value::Scalar(ScalarValue::Int(v)) => lanes.push(f64::from_bits(*v as u64)),
        Value::Scalar(ScalarValue::Bool(v)) => lanes.push(if *v { 1.0 } else { 0.0 }),
        Value::List(items) | Value::Tuple(items) => {
            for item in items {
                push_leaves(item, lanes);
            }
        }
    }
}

/// Rebuild a value from its staging tensor and recorded signature.
///
/// # Errors
///
/// `ProtocolViolation` if the lane count does not match the signature. The
/// tensor and signature are produced together, so a mismatch means the
/// synchronized bytes do not belong to this descriptor.
pub fn reconstruct(tensor: &Tensor, signature: &TypeSignature) -> Result<Value> {
    let lanes = tensor.to_vec::<f64>()?;
    if lanes.len() != signature.leaf_count() {
        return Err(Error::ProtocolViolation {
            reason: format!(
                "signature describes {} leaves but tensor holds {} lanes",
                signature.leaf_count(),
                lanes.len()
            ),
        });
    }
    let mut pos = 0;
    let value = read_value(&lanes, &mut pos, signature);
    Ok(value)
}

fn read_value(lanes: &[f64], pos: &mut usize, signature: &TypeSignature) -> Value {
    match signature {
        TypeSignature::Scalar(kind) => {
            let lane = lanes[*pos];
            *pos += 1;
            match kind {
                ScalarKind::Float => Value::Scalar(ScalarValue::Float(lane)),
                ScalarKind::Int => Value::Scalar(ScalarValue::Int(lane.to_bits() as i64)),
                ScalarKind::Bool => Value::Scalar(ScalarValue::Bool(lane != 0.0)),
            }
        }
        TypeSignature::Container(kind, items) => {
            let rebuilt: Vec<Value> = items
                .iter()
                .map(|item| read_value(lanes, pos, item))
                .collect();
            match kind {
                ContainerKind::List => Value::List(rebuilt),
                ContainerKind::Tuple => Value::Tuple(rebuilt),
            }
        }
    }
}
