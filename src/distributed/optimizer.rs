//! Distributed optimizer wrapper.
//!
//! Decorates a base optimizer's `step` with cross-rank gradient averaging.
//! `local_step` bypasses the decoration entirely; the state broadcaster's
//! bootstrap depends on that to avoid issuing a collective from a code path
//! not every rank reaches.

use std::collections::HashMap;
use std::sync::Arc;

use crate::comm::Collective;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::optimizer::state::{GradStore, ParamId, Parameter, StateDict};
use crate::optimizer::traits::Optimizer;
use crate::tensor::Tensor;

/// Wraps an optimizer so every `step` first averages gradients across ranks.
///
/// Averaging runs over the allgather primitive: each rank contributes its
/// gradient bytes per parameter (iterated in ascending id order, identical on
/// every rank) and reduces the gathered lanes locally. Falls back to the
/// plain inner step when the world has one rank.
pub struct DistributedOptimizer<O> {
    inner: O,
    comm: Arc<dyn Collective>,
}

impl<O: Optimizer> DistributedOptimizer<O> {
    pub fn new(inner: O, comm: Arc<dyn Collective>) -> Self {
        Self { inner, comm }
    }

    /// The wrapped optimizer.
    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn into_inner(self) -> O {
        self.inner
    }
}

fn average_grads(comm: &dyn Collective, grads: &GradStore) -> Result<GradStore> {
    let world_size = comm.world_size();
    let mut averaged = GradStore::new();

    for pid in grads.param_ids() {
        let grad = grads.get(pid).expect("id from param_ids()");
        if grad.dtype() != DType::F32 {
            return Err(Error::DTypeMismatch {
                expected: DType::F32,
                got: grad.dtype(),
            });
        }

        let gathered = comm.allgather(grad.as_bytes(), grad.dtype(), &format!("grad.{pid}"))?;
        if gathered.len() != world_size * grad.size_bytes() {
            return Err(Error::ProtocolViolation {
                reason: format!(
                    "gathered gradient for {pid} holds {} bytes, expected {}",
                    gathered.len(),
                    world_size * grad.size_bytes()
                ),
            });
        }

        let mut sum = vec![0.0f32; grad.numel()];
        for segment in gathered.chunks_exact(grad.size_bytes()) {
            let lanes: Vec<f32> = bytemuck::pod_collect_to_vec(segment);
            for (acc, lane) in sum.iter_mut().zip(&lanes) {
                *acc += lane;
            }
        }
        let scale = 1.0 / world_size as f32;
        for acc in &mut sum {
            *acc *= scale;
        }

        averaged.insert(pid, Tensor::from_slice(&sum, grad.shape()));
    }

    Ok(averaged)
}

impl<O: Optimizer> Optimizer for DistributedOptimizer<O> {
    fn step(
        &mut self,
        params: &mut HashMap<ParamId, Parameter>,
        grads: &GradStore,
    ) -> Result<()> {
        if self.comm.world_size() <= 1 {
            return self.inner.step(params, grads);
        }
        let averaged = average_grads(self.comm.as_ref(), grads)?;
        self.inner.step(params, &averaged)
    }

    fn local_step(
        &mut self,
        params: &mut HashMap<ParamId, Parameter>,
        grads: &GradStore,
    ) -> Result<()> {
        self.inner.local_step(params, grads)
    }

    fn supports_state_sync(&self) -> bool {
        self.inner.supports_state_sync()
    }

    fn state_dict(&self) -> &StateDict {
        self.inner.state_dict()
    }

    fn state_dict_mut(&mut self) -> &mut StateDict {
        self.inner.state_dict_mut()
    }

    fn set_lr(&mut self, lr: f64) {
        self.inner.set_lr(lr)
    }

    fn lr(&self) -> f64 {
        self.inner.lr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::sgd::{Sgd, SgdConfig};
    use crate::test_utils::CountingCollective;

    fn setup() -> (HashMap<ParamId, Parameter>, ParamId, GradStore) {
        let pid = ParamId::from_raw(0);
        let mut params = HashMap::new();
        params.insert(pid, Parameter::new(Tensor::from_slice(&[1.0f32], &[1])));
        let mut grads = GradStore::new();
        grads.insert(pid, Tensor::from_slice(&[0.5f32], &[1]));
        (params, pid, grads)
    }

    #[test]
    fn test_local_step_issues_no_collectives() {
        let comm = Arc::new(CountingCollective::default());
        let (mut params, pid, grads) = setup();
        let mut opt = DistributedOptimizer::new(Sgd::new(SgdConfig::default(), &[pid]), comm.clone());

        opt.local_step(&mut params, &grads).unwrap();
        assert_eq!(comm.calls(), 0);
        assert!(!opt.state_dict().state.is_empty());
    }

    #[test]
    fn test_step_world_one_falls_back() {
        let comm = Arc::new(CountingCollective::default());
        let (mut params, pid, grads) = setup();
        let mut opt = DistributedOptimizer::new(
            Sgd::new(
                SgdConfig {
                    lr: 0.5,
                    ..Default::default()
                },
                &[pid],
            ),
            comm.clone(),
        );

        opt.step(&mut params, &grads).unwrap();
        // world_size == 1 short-circuits the averaging entirely.
        assert_eq!(comm.calls(), 0);
        assert_eq!(params[&pid].tensor.to_vec::<f32>().unwrap(), vec![0.75]);
    }

    #[test]
    fn test_delegates_state_access() {
        let comm = Arc::new(CountingCollective::default());
        let pid = ParamId::from_raw(0);
        let mut opt = DistributedOptimizer::new(Sgd::new(SgdConfig::default(), &[pid]), comm);
        assert!(opt.supports_state_sync());
        opt.set_lr(0.25);
        assert_eq!(opt.lr(), 0.25);
        assert_eq!(opt.inner().lr(), 0.25);
    }
}
