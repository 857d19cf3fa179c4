//! SGD optimizer with momentum
//!
//! Implements stochastic gradient descent with optional momentum and weight
//! decay, following PyTorch's SGD semantics with Nesterov momentum support.
//! All tunable values live in the [`StateDict`] so the state broadcaster can
//! walk and synchronize them generically.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::optimizer::state::{
    GradStore, ParamGroup, ParamId, Parameter, StateDict, StateValue, Value,
};
use crate::optimizer::traits::Optimizer;
use crate::tensor::Tensor;

/// SGD configuration
#[derive(Debug, Clone)]
pub struct SgdConfig {
    pub lr: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub dampening: f64,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.0,
            weight_decay: 0.0,
            dampening: 0.0,
            nesterov: false,
        }
    }
}

impl SgdConfig {
    fn into_group(self, params: Vec<ParamId>) -> ParamGroup {
        let mut group = ParamGroup {
            options: Vec::new(),
            params,
        };
        group.set_option("lr", Value::float(self.lr));
        group.set_option("momentum", Value::float(self.momentum));
        group.set_option("dampening", Value::float(self.dampening));
        group.set_option("weight_decay", Value::float(self.weight_decay));
        group.set_option("nesterov", Value::boolean(self.nesterov));
        group
    }
}

/// SGD optimizer with optional momentum
///
/// When `momentum > 0`, maintains a `momentum_buffer` tensor per parameter,
/// plus a scalar `step` counter.
///
/// Update rules (following PyTorch):
/// - L2 weight decay: `grad = grad + weight_decay * param`
/// - Momentum: `buf = momentum * buf + (1 - dampening) * grad`
/// - Nesterov: `update = grad + momentum * buf`
/// - Standard: `update = buf`
/// - Parameter: `param = param - lr * update`
pub struct Sgd {
    state: StateDict,
}

impl Sgd {
    pub fn new(config: SgdConfig, params: &[ParamId]) -> Self {
        Self {
            state: StateDict {
                param_groups: vec![config.into_group(params.to_vec())],
                state: HashMap::new(),
            },
        }
    }

    /// Append a parameter group with its own hyperparameters, e.g. to train
    /// previously frozen layers at a different rate.
    pub fn add_param_group(&mut self, config: SgdConfig, params: Vec<ParamId>) {
        self.state.param_groups.push(config.into_group(params));
    }
}

impl Optimizer for Sgd {
    fn step(
        &mut self,
        params: &mut HashMap<ParamId, Parameter>,
        grads: &GradStore,
    ) -> Result<()> {
        let StateDict { param_groups, state } = &mut self.state;

        for group in param_groups.iter() {
            let lr = group.option_f64("lr")? as f32;
            let momentum = group.option_f64("momentum")? as f32;
            let dampening = group.option_f64("dampening")? as f32;
            let weight_decay = group.option_f64("weight_decay")? as f32;
            let nesterov = group.option_bool("nesterov")?;

            for &pid in &group.params {
                let grad = match grads.get(pid) {
                    Some(g) => g,
                    None => continue,
                };
                let param = params.get_mut(&pid).ok_or_else(|| Error::InvalidArgument {
                    arg: "params",
                    reason: format!("optimizer group references unknown parameter {pid}"),
                })?;

                let mut g = grad.to_vec::<f32>()?;
                let mut p = param.tensor.to_vec::<f32>()?;

                if weight_decay != 0.0 {
                    for (gi, pi) in g.iter_mut().zip(&p) {
                        *gi += weight_decay * pi;
                    }
                }

                let entry = state.entry(pid).or_default();

                let update: Vec<f32> = if momentum != 0.0 {
                    let buf = match entry.get("momentum_buffer") {
                        Some(StateValue::Tensor(prev)) => {
                            let mut buf = prev.to_vec::<f32>()?;
                            for (bi, gi) in buf.iter_mut().zip(&g) {
                                *bi = momentum * *bi + (1.0 - dampening) * gi;
                            }
                            buf
                        }
                        _ => g.clone(),
                    };
                    entry.insert(
                        "momentum_buffer".to_string(),
                        StateValue::Tensor(Tensor::from_slice(&buf, grad.shape())),
                    );
                    if nesterov {
                        g.iter().zip(&buf).map(|(gi, bi)| gi + momentum * bi).collect()
                    } else {
                        buf
                    }
                } else {
                    g
                };

                for (pi, ui) in p.iter_mut().zip(&update) {
                    *pi -= lr * ui;
                }
                param.tensor.copy_from_slice(&p)?;

                let count = entry
                    .get("step")
                    .and_then(|sv| match sv {
                        StateValue::Value(v) => v.as_i64(),
                        _ => None,
                    })
                    .unwrap_or(0);
                entry.insert("step".to_string(), StateValue::Value(Value::int(count + 1)));
            }
        }

        Ok(())
    }

    fn state_dict(&self) -> &StateDict {
        &self.state
    }

    fn state_dict_mut(&mut self) -> &mut StateDict {
        &mut self.state
    }

    fn set_lr(&mut self, lr: f64) {
        for group in &mut self.state.param_groups {
            group.set_option("lr", Value::float(lr));
        }
    }

    fn lr(&self) -> f64 {
        self.state
            .param_groups
            .first()
            .and_then(|g| g.option("lr"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_param(value: &[f32]) -> (HashMap<ParamId, Parameter>, ParamId) {
        let pid = ParamId::from_raw(0);
        let mut params = HashMap::new();
        params.insert(pid, Parameter::new(Tensor::from_slice(value, &[value.len()])));
        (params, pid)
    }

    #[test]
    fn test_plain_sgd_step() {
        let (mut params, pid) = one_param(&[1.0, 2.0]);
        let mut opt = Sgd::new(
            SgdConfig {
                lr: 0.5,
                ..Default::default()
            },
            &[pid],
        );

        let mut grads = GradStore::new();
        grads.insert(pid, Tensor::from_slice(&[1.0f32, 1.0], &[2]));
        opt.step(&mut params, &grads).unwrap();

        let p = params[&pid].tensor.to_vec::<f32>().unwrap();
        assert_eq!(p, vec![0.5, 1.5]);
    }

    #[test]
    fn test_momentum_buffer_created() {
        let (mut params, pid) = one_param(&[0.0, 0.0]);
        let mut opt = Sgd::new(
            SgdConfig {
                lr: 0.1,
                momentum: 0.9,
                ..Default::default()
            },
            &[pid],
        );

        let mut grads = GradStore::new();
        grads.insert(pid, Tensor::from_slice(&[1.0f32, 2.0], &[2]));
        opt.step(&mut params, &grads).unwrap();

        let entry = &opt.state_dict().state[&pid];
        match &entry["momentum_buffer"] {
            StateValue::Tensor(buf) => {
                assert_eq!(buf.to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
            }
            other => panic!("expected tensor buffer, got {other:?}"),
        }
        match &entry["step"] {
            StateValue::Value(v) => assert_eq!(v.as_i64(), Some(1)),
            other => panic!("expected scalar step, got {other:?}"),
        }
    }

    #[test]
    fn test_step_counter_increments() {
        let (mut params, pid) = one_param(&[1.0]);
        let mut opt = Sgd::new(SgdConfig::default(), &[pid]);

        let mut grads = GradStore::new();
        grads.insert(pid, Tensor::from_slice(&[0.5f32], &[1]));
        opt.step(&mut params, &grads).unwrap();
        opt.step(&mut params, &grads).unwrap();

        match &opt.state_dict().state[&pid]["step"] {
            StateValue::Value(v) => assert_eq!(v.as_i64(), Some(2)),
            other => panic!("unexpected step value {other:?}"),
        }
    }

    #[test]
    fn test_params_without_grads_skipped() {
        let (mut params, pid) = one_param(&[1.0]);
        let mut opt = Sgd::new(SgdConfig::default(), &[pid]);

        opt.step(&mut params, &GradStore::new()).unwrap();
        assert!(opt.state_dict().state.is_empty());
        assert_eq!(params[&pid].tensor.to_vec::<f32>().unwrap(), vec![1.0]);
    }

    #[test]
    fn test_set_lr_updates_all_groups() {
        let pid2 = ParamId::from_raw(1);
        let (_params, pid) = one_param(&[1.0]);
        let mut opt = Sgd::new(SgdConfig::default(), &[pid]);
        opt.add_param_group(SgdConfig::default(), vec![pid2]);

        opt.set_lr(0.123);
        assert_eq!(opt.lr(), 0.123);
        for group in &opt.state_dict().param_groups {
            assert_eq!(group.option_f64("lr").unwrap(), 0.123);
        }
    }
}
