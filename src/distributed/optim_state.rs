//! Optimizer state broadcaster.
//!
//! Walks an optimizer's structured state, flattens every non-tensor value
//! into a uniquely keyed staging tensor, broadcasts the full batch once, and
//! writes the synchronized values back into the state dict in place.
//!
//! Cross-rank correctness relies on the state being structurally identical on
//! every rank before the call: group order, per-group parameter order, and
//! state-entry field order are the implicit indexing scheme. No explicit
//! ordinal is assigned or transmitted.

use std::collections::HashMap;

use tracing::debug;

use crate::comm::Collective;
use crate::distributed::flatten::{flatten, reconstruct, TypeSignature};
use crate::distributed::params::{broadcast_parameters, Params};
use crate::error::{Error, Result};
use crate::optimizer::state::{GradStore, ParamId, Parameter, StateValue};
use crate::optimizer::traits::Optimizer;
use crate::tensor::Tensor;

/// Where a synchronized batch entry is written back to.
enum Target {
    /// A group hyperparameter, keyed `{option}.{group_index}` on the wire.
    GroupOption {
        group: usize,
        name: String,
        signature: TypeSignature,
    },
    /// A tensor-valued state field, moved back verbatim.
    TensorField { pid: ParamId, field: String },
    /// A flattened scalar/container state field, keyed `{field}.{occurrence}`.
    ScalarField {
        pid: ParamId,
        field: String,
        signature: TypeSignature,
    },
}

/// Broadcast an optimizer's entire tunable state from `root_rank` to all
/// ranks, mutating non-root state in place.
///
/// Freshly constructed optimizers have no materialized state; in that case
/// one bootstrap `local_step` with zero gradients populates it first. The
/// bootstrap deliberately bypasses any collective-decorated `step`; see
/// [`Optimizer::local_step`].
///
/// A stateless optimizer (still no state after bootstrap) is a valid silent
/// no-op with zero collective calls.
///
/// # Errors
///
/// `UnsupportedOptimizer` if the optimizer opts out of state sync, raised
/// before any communication. Broadcast errors propagate unchanged; values are
/// written back only after the whole batch completed.
pub fn broadcast_optimizer_state<O>(
    comm: &dyn Collective,
    optimizer: &mut O,
    params: &mut HashMap<ParamId, Parameter>,
    root_rank: usize,
) -> Result<()>
where
    O: Optimizer + ?Sized,
{
    if !optimizer.supports_state_sync() {
        return Err(Error::UnsupportedOptimizer {
            reason: "optimizer state cannot be flattened deterministically".to_string(),
        });
    }

    // Newly created optimizers have no per-parameter state yet; run one
    // zero-gradient base step to materialize it.
    if optimizer.state_dict().state.is_empty() {
        let mut grads = GradStore::new();
        for (&pid, param) in params.iter() {
            if param.requires_grad {
                grads.insert(pid, param.tensor.zeros_like());
            }
        }
        optimizer.local_step(params, &grads)?;
    }

    // Still empty: the optimizer is legitimately stateless.
    if optimizer.state_dict().state.is_empty() {
        debug!("optimizer has no state; nothing to broadcast");
        return Ok(());
    }

    let mut batch: Vec<(Option<String>, Tensor)> = Vec::new();
    let mut targets: Vec<Target> = Vec::new();
    let mut occurrences: HashMap<String, usize> = HashMap::new();

    {
        let state_dict = optimizer.state_dict();

        // Param groups are an ordered list, normally one per model, but users
        // can add groups e.g. to train previously frozen layers.
        for (index, group) in state_dict.param_groups.iter().enumerate() {
            for (name, value) in &group.options {
                batch.push((Some(format!("{name}.{index}")), flatten(value)));
                targets.push(Target::GroupOption {
                    group: index,
                    name: name.clone(),
                    signature: TypeSignature::of(value),
                });
            }

            // The params list is ordered by the layers in the model.
            for pid in &group.params {
                let entry = match state_dict.state.get(pid) {
                    Some(entry) => entry,
                    // The param never received gradients, so skip broadcast.
                    None => continue,
                };

                for (field, state_value) in entry {
                    // Field names recur across parameters; the occurrence
                    // counter makes the wire key unique.
                    let occ = occurrences.entry(field.clone()).or_insert(0);
                    *occ += 1;
                    let key = format!("{field}.{occ}");

                    match state_value {
                        StateValue::Tensor(tensor) => {
                            batch.push((Some(key), tensor.clone()));
                            targets.push(Target::TensorField {
                                pid: *pid,
                                field: field.clone(),
                            });
                        }
                        StateValue::Value(value) => {
                            batch.push((Some(key), flatten(value)));
                            targets.push(Target::ScalarField {
                                pid: *pid,
                                field: field.clone(),
                                signature: TypeSignature::of(value),
                            });
                        }
                    }
                }
            }
        }
    }

    debug!(entries = batch.len(), "broadcasting optimizer state");

    // Synchronized broadcast of the full batch.
    broadcast_parameters(comm, Params::Sequence(&mut batch), root_rank)?;

    // Write every synchronized entry back into its state slot.
    let state_dict = optimizer.state_dict_mut();
    for ((_, tensor), target) in batch.into_iter().zip(targets) {
        match target {
            Target::GroupOption {
                group,
                name,
                signature,
            } => {
                let value = reconstruct(&tensor, &signature)?;
                state_dict.param_groups[group].set_option(&name, value);
            }
            Target::TensorField { pid, field } => {
                if let Some(entry) = state_dict.state.get_mut(&pid) {
                    entry.insert(field, StateValue::Tensor(tensor));
                }
            }
            Target::ScalarField {
                pid,
                field,
                signature,
            } => {
                let value = reconstruct(&tensor, &signature)?;
                if let Some(entry) = state_dict.state.get_mut(&pid) {
                    entry.insert(field, StateValue::Value(value));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoOpCollective;
    use crate::optimizer::sgd::{Sgd, SgdConfig};
    use crate::optimizer::state::StateDict;
    use crate::tensor::Tensor;
    use crate::test_utils::CountingCollective;

    /// Optimizer whose state layout is too irregular to flatten.
    struct Irregular {
        state: StateDict,
    }

    impl Optimizer for Irregular {
        fn step(
            &mut self,
            _params: &mut HashMap<ParamId, Parameter>,
            _grads: &GradStore,
        ) -> Result<()> {
            Ok(())
        }

        fn supports_state_sync(&self) -> bool {
            false
        }

        fn state_dict(&self) -> &StateDict {
            &self.state
        }

        fn state_dict_mut(&mut self) -> &mut StateDict {
            &mut self.state
        }

        fn set_lr(&mut self, _lr: f64) {}

        fn lr(&self) -> f64 {
            0.0
        }
    }

    fn param_setup(requires_grad: bool) -> (HashMap<ParamId, Parameter>, ParamId) {
        let pid = ParamId::from_raw(0);
        let tensor = Tensor::from_slice(&[1.0f32, 2.0], &[2]);
        let param = if requires_grad {
            Parameter::new(tensor)
        } else {
            Parameter::frozen(tensor)
        };
        let mut params = HashMap::new();
        params.insert(pid, param);
        (params, pid)
    }

    #[test]
    fn test_unsupported_optimizer_zero_collective_calls() {
        let comm = CountingCollective::default();
        let (mut params, _) = param_setup(true);
        let mut opt = Irregular {
            state: StateDict::default(),
        };

        let err = broadcast_optimizer_state(&comm, &mut opt, &mut params, 0);
        assert!(matches!(err, Err(Error::UnsupportedOptimizer { .. })));
        assert_eq!(comm.calls(), 0);
    }

    #[test]
    fn test_stateless_optimizer_silent_noop() {
        // No parameter requires gradients, so the bootstrap step materializes
        // nothing and the call must return without any communication.
        let comm = CountingCollective::default();
        let (mut params, pid) = param_setup(false);
        let mut opt = Sgd::new(SgdConfig::default(), &[pid]);

        broadcast_optimizer_state(&comm, &mut opt, &mut params, 0).unwrap();
        assert_eq!(comm.calls(), 0);
        assert!(opt.state_dict().state.is_empty());
    }

    #[test]
    fn test_lazy_init_materializes_state() {
        let comm = NoOpCollective;
        let (mut params, pid) = param_setup(true);
        let mut opt = Sgd::new(
            SgdConfig {
                momentum: 0.9,
                ..Default::default()
            },
            &[pid],
        );
        assert!(opt.state_dict().state.is_empty());

        broadcast_optimizer_state(&comm, &mut opt, &mut params, 0).unwrap();

        let entry = &opt.state_dict().state[&pid];
        assert!(entry.contains_key("momentum_buffer"));
        assert!(entry.contains_key("step"));
        // Zero gradients must leave the parameter values untouched.
        assert_eq!(params[&pid].tensor.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_wire_keys_unique_across_params() {
        // Two parameters sharing the same state field names must yield
        // distinct wire keys via the occurrence counter.
        let comm = NoOpCollective;
        let pids = [ParamId::from_raw(0), ParamId::from_raw(1)];
        let mut params = HashMap::new();
        for pid in pids {
            params.insert(pid, Parameter::new(Tensor::from_slice(&[1.0f32], &[1])));
        }
        let mut opt = Sgd::new(
            SgdConfig {
                momentum: 0.9,
                ..Default::default()
            },
            &pids,
        );

        broadcast_optimizer_state(&comm, &mut opt, &mut params, 0).unwrap();

        // Both entries survive with their own buffers; a key collision would
        // have failed the batched broadcast.
        assert_eq!(opt.state_dict().state.len(), 2);
        for pid in pids {
            assert!(opt.state_dict().state[&pid].contains_key("momentum_buffer"));
        }
    }

    #[test]
    fn test_existing_state_survives_world_one_sync() {
        let comm = NoOpCollective;
        let (mut params, pid) = param_setup(true);
        let mut opt = Sgd::new(
            SgdConfig {
                lr: 0.1,
                momentum: 0.9,
                ..Default::default()
            },
            &[pid],
        );

        let mut grads = GradStore::new();
        grads.insert(pid, Tensor::from_slice(&[1.0f32, 1.0], &[2]));
        opt.step(&mut params, &grads).unwrap();
        let before = opt.state_dict().clone();

        broadcast_optimizer_state(&comm, &mut opt, &mut params, 0).unwrap();
        assert_eq!(*opt.state_dict(), before);
    }
}
