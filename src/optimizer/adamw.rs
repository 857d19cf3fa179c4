//! AdamW optimizer
//!
//! Implements decoupled weight decay regularization (Loshchilov & Hutter,
//! 2019). Per-parameter state is two moment tensors plus a scalar step
//! counter; the `betas` pair is stored as a tuple option so the state
//! broadcaster exercises nested-container reconstruction.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::optimizer::state::{
    GradStore, ParamGroup, ParamId, Parameter, StateDict, StateValue, Value,
};
use crate::optimizer::traits::Optimizer;
use crate::tensor::Tensor;

/// AdamW configuration
#[derive(Debug, Clone)]
pub struct AdamWConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.01,
        }
    }
}

impl AdamWConfig {
    fn into_group(self, params: Vec<ParamId>) -> ParamGroup {
        let mut group = ParamGroup {
            options: Vec::new(),
            params,
        };
        group.set_option("lr", Value::float(self.lr));
        group.set_option(
            "betas",
            Value::Tuple(vec![Value::float(self.beta1), Value::float(self.beta2)]),
        );
        group.set_option("eps", Value::float(self.eps));
        group.set_option("weight_decay", Value::float(self.weight_decay));
        group
    }
}

/// AdamW optimizer with decoupled weight decay
///
/// Maintains first moment (`exp_avg`) and second moment (`exp_avg_sq`)
/// estimates per parameter, lazily initialized on the first `step()` that
/// sees a gradient for that parameter.
pub struct AdamW {
    state: StateDict,
}

impl AdamW {
    pub fn new(config: AdamWConfig, params: &[ParamId]) -> Self {
        Self {
            state: StateDict {
                param_groups: vec![config.into_group(params.to_vec())],
                state: HashMap::new(),
            },
        }
    }

    /// Append a parameter group with its own hyperparameters.
    pub fn add_param_group(&mut self, config: AdamWConfig, params: Vec<ParamId>) {
        self.state.param_groups.push(config.into_group(params));
    }
}

fn group_betas(group: &ParamGroup) -> Result<(f64, f64)> {
    match group.option("betas") {
        Some(Value::Tuple(pair)) if pair.len() == 2 => {
            match (pair[0].as_f64(), pair[1].as_f64()) {
                (Some(b1), Some(b2)) => Ok((b1, b2)),
                _ => Err(Error::InvalidArgument {
                    arg: "param_group",
                    reason: "betas tuple must hold two floats".to_string(),
                }),
            }
        }
        _ => Err(Error::InvalidArgument {
            arg: "param_group",
            reason: "missing or malformed 'betas' option".to_string(),
        }),
    }
}

impl Optimizer for AdamW {
    fn step(
        &mut self,
        params: &mut HashMap<ParamId, Parameter>,
        grads: &GradStore,
    ) -> Result<()> {
        let StateDict { param_groups, state } = &mut self.state;

        for group in param_groups.iter() {
            let lr = group.option_f64("lr")?;
            let (beta1, beta2) = group_betas(group)?;
            let eps = group.option_f64("eps")?;
            let weight_decay = group.option_f64("weight_decay")?;

            for &pid in &group.params {
                let grad = match grads.get(pid) {
                    Some(g) => g,
                    None => continue,
                };
                let param = params.get_mut(&pid).ok_or_else(|| Error::InvalidArgument {
                    arg: "params",
                    reason: format!("optimizer group references unknown parameter {pid}"),
                })?;

                let g = grad.to_vec::<f32>()?;
                let mut p = param.tensor.to_vec::<f32>()?;

                let entry = state.entry(pid).or_default();

                let step = entry
                    .get("step")
                    .and_then(|sv| match sv {
                        StateValue::Value(v) => v.as_i64(),
                        _ => None,
                    })
                    .unwrap_or(0)
                    + 1;

                let mut m = match entry.get("exp_avg") {
                    Some(StateValue::Tensor(t)) => t.to_vec::<f32>()?,
                    _ => vec![0.0; g.len()],
                };
                let mut v = match entry.get("exp_avg_sq") {
                    Some(StateValue::Tensor(t)) => t.to_vec::<f32>()?,
                    _ => vec![0.0; g.len()],
                };

                let b1 = beta1 as f32;
                let b2 = beta2 as f32;
                for i in 0..g.len() {
                    m[i] = b1 * m[i] + (1.0 - b1) * g[i];
                    v[i] = b2 * v[i] + (1.0 - b2) * g[i] * g[i];
                }

                let bias1 = 1.0 - beta1.powi(step as i32);
                let bias2 = 1.0 - beta2.powi(step as i32);
                let decay = (1.0 - lr * weight_decay) as f32;

                for i in 0..p.len() {
                    let m_hat = m[i] as f64 / bias1;
                    let v_hat = v[i] as f64 / bias2;
                    p[i] = decay * p[i] - (lr * m_hat / (v_hat.sqrt() + eps)) as f32;
                }
                param.tensor.copy_from_slice(&p)?;

                entry.insert(
                    "exp_avg".to_string(),
                    StateValue::Tensor(Tensor::from_slice(&m, grad.shape())),
                );
                entry.insert(
                    "exp_avg_sq".to_string(),
                    StateValue::Tensor(Tensor::from_slice(&v, grad.shape())),
                );
                entry.insert("step".to_string(), StateValue::Value(Value::int(step)));
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
