//! Collective communication contract.
//!
//! syncr never talks to a transport directly: everything flows through the
//! [`Collective`] trait: root broadcast (blocking and async-with-handle),
//! allgather, and topology queries. Buffer-mutating primitives take raw
//! pointers so backends can write into caller-owned memory in place; safe
//! tensor-level wrappers live in [`crate::distributed`].
//!
//! Every rank must invoke each collective the same number of times, in the
//! same order, with agreed shapes. A rank that never reaches a call hangs the
//! others indefinitely. That lock-step requirement is the protocol, not a
//! bug, and no timeout is provided at this layer.

pub mod local;
pub mod noop;

pub use local::{LocalCollective, LocalGroup};
pub use noop::NoOpCollective;

use crate::dtype::DType;
use crate::error::Result;

/// Token for an in-flight asynchronous broadcast.
///
/// Owned by the issuing call until passed to [`Collective::wait`], which
/// consumes it; a completed handle cannot be reused.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CollectiveHandle(u64);

impl CollectiveHandle {
    /// Construct a handle from a backend-chosen id.
    pub fn new(id: u64) -> Self {
        CollectiveHandle(id)
    }

    /// The backend-chosen id.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Collective communication primitives over a fixed set of ranks.
///
/// `name` disambiguates logical transfers inside the transport; callers must
/// keep names unique per distinct concurrent transfer. syncr guarantees that
/// for its own traffic via `.sz`/`.t` suffixes and per-field occurrence
/// counters.
pub trait Collective: Send + Sync {
    /// This process's rank in `[0, world_size)`.
    fn rank(&self) -> usize;

    /// Number of participating ranks.
    fn world_size(&self) -> usize;

    /// Blocking root broadcast: after return, the buffer on every rank holds
    /// the root rank's value.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `count * dtype.size_bytes()` valid bytes that stay
    /// alive and unaliased until the call returns.
    unsafe fn broadcast(
        &self,
        ptr: u64,
        count: usize,
        dtype: DType,
        root: usize,
        name: &str,
    ) -> Result<()>;

    /// Asynchronous root broadcast. Returns immediately; the transfer is
    /// complete only once [`wait`](Collective::wait) returns on the handle.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `count * dtype.size_bytes()` valid bytes that stay
    /// alive and unaliased until `wait` returns for the produced handle.
    unsafe fn broadcast_async(
        &self,
        ptr: u64,
        count: usize,
        dtype: DType,
        root: usize,
        name: &str,
    ) -> Result<CollectiveHandle>;

    /// Block until the broadcast behind `handle` has completed on this rank.
    fn wait(&self, handle: CollectiveHandle) -> Result<()>;

    /// Blocking allgather: contributes `src` and returns every rank's
    /// contribution concatenated in rank order.
    ///
    /// Per-rank contributions may differ in length; the caller partitions the
    /// result (typically via a prior size exchange).
    fn allgather(&self, src: &[u8], dtype: DType, name: &str) -> Result<Vec<u8>>;
}
