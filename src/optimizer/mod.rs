//! Optimizers and the structured state the broadcaster synchronizes.

pub mod adamw;
pub mod sgd;
pub mod state;
pub mod traits;

pub use adamw::{AdamW, AdamWConfig};
pub use sgd::{Sgd, SgdConfig};
pub use state::{
    GradStore, ParamGroup, ParamId, Parameter, ScalarValue, StateDict, StateEntry, StateValue,
    Value,
};
pub use traits::Optimizer;
