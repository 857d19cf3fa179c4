//! # syncr
//!
//! **Distributed training state synchronization: parameters, optimizer
//! state, and arbitrary objects over a collective communicator contract.**
//!
//! syncr keeps a fixed group of cooperating ranks in agreement about mutable
//! training state. It does not implement a transport, a device runtime, or
//! update-rule mathematics. It consumes a narrow set of collective
//! primitives and layers type-preserving synchronization protocols on top.
//!
//! ## Layering
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 syncr ◄── YOU ARE HERE                    │
//! │  (parameter broadcast, optimizer-state sync with type     │
//! │   reconstruction, object broadcast/allgather)             │
//! └──────────────────────────┬───────────────────────────────┘
//! │                 Collective contract                       │
//! │  (broadcast, async broadcast + wait, allgather, rank)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design
//!
//! - **Narrow transport contract**: everything flows through the
//!   [`comm::Collective`] trait; backends decide how bytes actually move
//! - **In-place semantics**: broadcasts overwrite the caller's buffers, no
//!   cross-process shared memory
//! - **Type-preserving flattening**: non-tensor state travels as staged f64
//!   tensors plus recursive type signatures, reconstructed losslessly
//! - **Lock-step collectives**: every rank must issue every collective in the
//!   same order; a mismatch deadlocks by design, there is no timeout here
//!
//! Every rank must also hold structurally identical optimizer state (group
//! order, parameter order, field order) before a state broadcast; structure
//! is the implicit indexing scheme, nothing ordinal is transmitted.

pub mod comm;
pub mod distributed;
pub mod dtype;
pub mod error;
pub mod optimizer;
pub mod tensor;

// Re-export the primary protocol entry points
pub use distributed::{
    allgather_object, broadcast_object, broadcast_optimizer_state, broadcast_parameters,
    DistributedOptimizer, Params,
};

// Re-export types users will commonly need
pub use comm::{Collective, CollectiveHandle, LocalGroup, NoOpCollective};
pub use dtype::DType;
pub use error::{Error, Result};
pub use optimizer::{AdamW, AdamWConfig, Optimizer, Sgd, SgdConfig};
pub use tensor::Tensor;
