//! Optimizer state model.
//!
//! The broadcaster in [`crate::distributed`] walks this structure generically,
//! so its shape is part of the synchronization protocol: parameter-group order,
//! the `params` list inside each group, and state-entry field order must be
//! identical on every rank before a broadcast begins. `StateEntry` is a
//! `BTreeMap` so field iteration order is deterministic by construction.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// Stable identifier for one trainable parameter.
///
/// Ranks must assign identical ids to structurally identical parameters;
/// constructing parameters in the same order on every rank (or using
/// [`ParamId::from_raw`]) guarantees that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

static NEXT_PARAM_ID: AtomicUsize = AtomicUsize::new(0);

impl ParamId {
    /// Allocate the next process-wide id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        ParamId(NEXT_PARAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Build an id from an explicit value, for callers that manage their own
    /// cross-rank numbering.
    pub fn from_raw(raw: usize) -> Self {
        ParamId(raw)
    }

    pub fn raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ParamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A trainable parameter: its tensor plus whether it participates in
/// gradient computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub tensor: Tensor,
    pub requires_grad: bool,
}

impl Parameter {
    /// Parameter that receives gradients.
    pub fn new(tensor: Tensor) -> Self {
        Self {
            tensor,
            requires_grad: true,
        }
    }

    /// Frozen parameter, excluded from optimization.
    pub fn frozen(tensor: Tensor) -> Self {
        Self {
            tensor,
            requires_grad: false,
        }
    }
}

/// Gradients keyed by parameter id.
#[derive(Debug, Default)]
pub struct GradStore {
    grads: HashMap<ParamId, Tensor>,
}

impl GradStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ParamId, grad: Tensor) {
        self.grads.insert(id, grad);
    }

    pub fn get(&self, id: ParamId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    /// Parameter ids in ascending order, for cross-rank-deterministic iteration.
    pub fn param_ids(&self) -> Vec<ParamId> {
        let mut ids: Vec<ParamId> = self.grads.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// A non-tensor scalar leaf.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Float(f64),
    Int(i64),
    Bool(bool),
}

/// A non-tensor optimizer value: a scalar or an arbitrarily nested container.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(ScalarValue),
    List(Vec<Value>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn float(v: f64) -> Self {
        Value::Scalar(ScalarValue::Float(v))
    }

    pub fn int(v: i64) -> Self {
        Value::Scalar(ScalarValue::Int(v))
    }

    pub fn boolean(v: bool) -> Self {
        Value::Scalar(ScalarValue::Bool(v))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Scalar(ScalarValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Scalar(ScalarValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Scalar(ScalarValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }
}

/// One state field: either a tensor or a plain value.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Tensor(Tensor),
    Value(Value),
}

/// Per-parameter state: field name → state value, deterministically ordered.
pub type StateEntry = BTreeMap<String, StateValue>;

/// One parameter group: ordered hyperparameter options plus the ordered list
/// of member parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGroup {
    /// Hyperparameters, in a fixed order that must match across ranks.
    pub options: Vec<(String, Value)>,
    /// Member parameters, in model order.
    pub params: Vec<ParamId>,
}

impl ParamGroup {
    pub fn option(&self, name: &str) -> Option<&Value> {
        self.options
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    /// Replace an existing option in place, or append a new one.
    pub fn set_option(&mut self, name: &str, value: Value) {
        match self.options.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.options.push((name.to_string(), value)),
        }
    }

    /// Read a float option, failing if it is missing or of the wrong kind.
    pub fn option_f64(&self, name: &str) -> Result<f64> {
        self.option(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::InvalidArgument {
                arg: "param_group",
                reason: format!("missing or non-float option '{name}'"),
            })
    }

    /// Read a bool option, failing if it is missing or of the wrong kind.
    pub fn option_bool(&self, name: &str) -> Result<bool> {
        self.option(name)
            .and_then(Value::as_bool)
            .ok_or_else(|| Error::InvalidArgument {
                arg: "param_group",
                reason: format!("missing or non-bool option '{name}'"),
            })
    }
}

/// An optimizer's full tunable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDict {
    pub param_groups: Vec<ParamGroup>,
    pub state: HashMap<ParamId, StateEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_id_ordering() {
        let a = ParamId::from_raw(1);
        let b = ParamId::from_raw(2);
        assert!(a < b);
        assert_eq!(a.raw(), 1);
        assert_eq!(format!("{a}"), "p1");
    }

    #[test]
    fn test_grad_store_sorted_ids() {
        let mut grads = GradStore::new();
        grads.insert(ParamId::from_raw(5), Tensor::scalar(1.0f32));
        grads.insert(ParamId::from_raw(2), Tensor::scalar(2.0f32));
        grads.insert(ParamId::from_raw(9), Tensor::scalar(3.0f32));
        assert_eq!(
            grads.param_ids(),
            vec![
                ParamId::from_raw(2),
                ParamId::from_raw(5),
                ParamId::from_raw(9)
            ]
        );
    }

    #[test]
    fn test_group_options() {
        let mut group = ParamGroup::default();
        group.set_option("lr", Value::float(0.1));
        group.set_option("nesterov", Value::boolean(true));
        assert_eq!(group.option_f64("lr").unwrap(), 0.1);
        assert!(group.option_bool("nesterov").unwrap());

        group.set_option("lr", Value::float(0.2));
        assert_eq!(group.option_f64("lr").unwrap(), 0.2);
        assert_eq!(group.options.len(), 2);

        assert!(group.option_f64("missing").is_err());
        assert!(group.option_bool("lr").is_err());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::float(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::int(-3).as_i64(), Some(-3));
        assert_eq!(Value::boolean(true).as_bool(), Some(true));
        assert_eq!(Value::int(1).as_f64(), None);
    }
}
