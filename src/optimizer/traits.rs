//! Optimizer trait abstraction
//!
//! Defines a common interface for all optimizers so the state broadcaster and
//! trainers can be optimizer-agnostic. The split between `step` and
//! `local_step` is deliberate: distributed wrappers decorate `step` with
//! collective calls, while `local_step` always applies the undecorated base
//! update rule. Internal bootstrap paths that run state initialization must
//! use `local_step`: a decorated step reached from only some ranks would
//! leave the other ranks blocked on a collective that is never issued.

use std::collections::HashMap;

use crate::error::Result;
use crate::optimizer::state::{GradStore, ParamId, Parameter, StateDict};

/// Trait for parameter optimizers.
pub trait Optimizer {
    /// Perform one optimization step.
    ///
    /// Updates all parameters in `params` using gradients from `grads`.
    /// Parameters without gradients are skipped.
    fn step(&mut self, params: &mut HashMap<ParamId, Parameter>, grads: &GradStore)
        -> Result<()>;

    /// Apply the base update rule with no collective communication.
    ///
    /// Plain optimizers behave exactly like `step`; distributed wrappers
    /// forward to the wrapped optimizer.
    fn local_step(
        &mut self,
        params: &mut HashMap<ParamId, Parameter>,
        grads: &GradStore,
    ) -> Result<()> {
        self.step(params, grads)
    }

    /// Whether this optimizer's state can be flattened deterministically for
    /// broadcast. Optimizers with deeply nested or optional state report
    /// `false` and are rejected by the state broadcaster.
    fn supports_state_sync(&self) -> bool {
        true
    }

    /// The optimizer's full tunable state.
    fn state_dict(&self) -> &StateDict;

    /// Mutable access to the state, for in-place synchronization.
    fn state_dict_mut(&mut self) -> &mut StateDict;

    /// Set the learning rate on every parameter group.
    fn set_lr(&mut self, lr: f64);

    /// Get the current learning rate (of the first parameter group).
    fn lr(&self) -> f64;
}
