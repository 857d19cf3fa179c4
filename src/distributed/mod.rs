//! State synchronization protocols over the collective contract.

pub mod flatten;
pub mod object;
pub mod optim_state;
pub mod optimizer;
pub mod params;

pub use flatten::{flatten, reconstruct, ContainerKind, ScalarKind, TypeSignature};
pub use object::{allgather_object, broadcast_object};
pub use optim_state::broadcast_optimizer_state;
pub use optimizer::DistributedOptimizer;
pub use params::{broadcast_parameters, broadcast_tensor, broadcast_tensor_async, Params};
