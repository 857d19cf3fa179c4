//! Single-rank stand-in backend.

use crate::comm::{Collective, CollectiveHandle};
use crate::dtype::DType;
use crate::error::Result;

/// Collective backend for a world of one rank.
///
/// Every operation succeeds without touching buffers: with no peers, a
/// broadcast is already complete and an allgather returns the caller's own
/// contribution. Useful for single-process runs and unit tests.
#[derive(Debug, Default)]
pub struct NoOpCollective;

impl Collective for NoOpCollective {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    unsafe fn broadcast(
        &self,
        _ptr: u64,
        _count: usize,
        _dtype: DType,
        _root: usize,
        _name: &str,
    ) -> Result<()> {
        Ok(())
    }

    unsafe fn broadcast_async(
        &self,
        _ptr: u64,
        _count: usize,
        _dtype: DType,
        _root: usize,
        _name: &str,
    ) -> Result<CollectiveHandle> {
        Ok(CollectiveHandle::new(0))
    }

    fn wait(&self, _handle: CollectiveHandle) -> Result<()> {
        Ok(())
    }

    fn allgather(&self, src: &[u8], _dtype: DType, _name: &str) -> Result<Vec<u8>> {
        Ok(src.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_topology() {
        let comm = NoOpCollective;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.world_size(), 1);
    }

    #[test]
    fn test_noop_allgather_returns_own() {
        let comm = NoOpCollective;
        let out = comm.allgather(&[1, 2, 3], DType::U8, "x").unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_noop_broadcast_leaves_buffer() {
        let comm = NoOpCollective;
        let buf = [5.0f32, 6.0];
        unsafe {
            comm.broadcast(buf.as_ptr() as u64, 2, DType::F32, 0, "x")
                .unwrap();
        }
        assert_eq!(buf, [5.0, 6.0]);
    }
}
