//! Parameter broadcaster.
//!
//! Safe tensor-level wrappers around the raw-pointer [`Collective`] trait,
//! plus the batched parameter broadcast: issue every transfer asynchronously,
//! then wait on all of them. Issuing before waiting overlaps the transfers'
//! network latency; waiting in a second pass bounds memory to one in-flight
//! batch.

use std::collections::{BTreeMap, HashSet};

use crate::comm::{Collective, CollectiveHandle};
use crate::error::{Error, Result};
use crate::tensor::Tensor;

/// A named collection of tensors to broadcast.
///
/// Mappings are iterated in key order (identical on every rank by `BTreeMap`
/// construction); sequences are iterated in place, with unnamed entries given
/// positional names.
pub enum Params<'a> {
    Map(&'a mut BTreeMap<String, Tensor>),
    Sequence(&'a mut [(Option<String>, Tensor)]),
}

/// Broadcast one tensor from `root` to all ranks, blocking.
pub fn broadcast_tensor(
    comm: &dyn Collective,
    tensor: &mut Tensor,
    root: usize,
    name: &str,
) -> Result<()> {
    // Safety: tensor owns its contiguous buffer and the &mut borrow outlives
    // the call.
    unsafe { comm.broadcast(tensor.data_ptr(), tensor.numel(), tensor.dtype(), root, name) }
}

/// Start an asynchronous broadcast of one tensor.
///
/// The returned handle must be waited on before the tensor is read, moved,
/// or dropped.
pub fn broadcast_tensor_async(
    comm: &dyn Collective,
    tensor: &mut Tensor,
    root: usize,
    name: &str,
) -> Result<CollectiveHandle> {
    // Safety: the caller keeps the &mut borrow alive until wait, per this
    // function's contract.
    unsafe {
        comm.broadcast_async(tensor.data_ptr(), tensor.numel(), tensor.dtype(), root, name)
    }
}

/// Broadcast a named collection of tensors from `root_rank` to all ranks.
///
/// Typical usage is to broadcast a model's parameters before training so all
/// ranks start from identical values. When this returns, every tensor on
/// every rank holds the root rank's value, in place.
///
/// # Errors
///
/// `InvalidArgument` for a root rank outside the group or for duplicate keys
/// within the batch, both detected before any network activity. Transport
/// errors propagate unchanged; no partial-completion state is exposed.
pub fn broadcast_parameters(
    comm: &dyn Collective,
    params: Params<'_>,
    root_rank: usize,
) -> Result<()> {
    if root_rank >= comm.world_size() {
        return Err(Error::InvalidArgument {
            arg: "root_rank",
            reason: format!(
                "rank {root_rank} out of range for world size {}",
                comm.world_size()
            ),
        });
    }

    let named: Vec<(String, &mut Tensor)> = match params {
        Params::Map(map) => map.iter_mut().map(|(k, t)| (k.clone(), t)).collect(),
        Params::Sequence(seq) => seq
            .iter_mut()
            .enumerate()
            .map(|(i, (name, t))| {
                let key = name.clone().unwrap_or_else(|| format!("param.{i}"));
                (key, t)
            })
            .collect(),
    };

    let mut seen = HashSet::new();
    for (key, _) in &named {
        if !seen.insert(key.as_str()) {
            return Err(Error::InvalidArgument {
                arg: "params",
                reason: format!("duplicate key '{key}' in broadcast batch"),
            });
        }
    }

    // Run asynchronous broadcasts, then wait for completion in issue order.
    let mut handles = Vec::with_capacity(named.len());
    for (name, tensor) in &named {
        let handle = unsafe {
            // Safety: every tensor stays mutably borrowed in `named` until all
            // waits below have returned.
            comm.broadcast_async(tensor.data_ptr(), tensor.numel(), tensor.dtype(), root_rank, name)
        }?;
        handles.push(handle);
    }
    for handle in handles {
        comm.wait(handle)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoOpCollective;
    use crate::dtype::DType;

    #[test]
    fn test_broadcast_map_noop() {
        let comm = NoOpCollective;
        let mut map = BTreeMap::new();
        map.insert("w".to_string(), Tensor::from_slice(&[1.0f32, 2.0], &[2]));
        map.insert("b".to_string(), Tensor::from_slice(&[0.5f32], &[1]));

        broadcast_parameters(&comm, Params::Map(&mut map), 0).unwrap();
        assert_eq!(map["w"].to_vec::<f32>().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_broadcast_sequence_unnamed() {
        let comm = NoOpCollective;
        let mut seq = vec![
            (None, Tensor::from_slice(&[1.0f32], &[1])),
            (Some("bias".to_string()), Tensor::from_slice(&[2.0f32], &[1])),
        ];
        broadcast_parameters(&comm, Params::Sequence(&mut seq), 0).unwrap();
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let comm = NoOpCollective;
        let mut seq = vec![
            (Some("w".to_string()), Tensor::zeros(&[1], DType::F32)),
            (Some("w".to_string()), Tensor::zeros(&[1], DType::F32)),
        ];
        let err = broadcast_parameters(&comm, Params::Sequence(&mut seq), 0);
        assert!(matches!(err, Err(Error::InvalidArgument { arg: "params", .. })));
    }

    #[test]
    fn test_root_out_of_range() {
        let comm = NoOpCollective;
        let mut map = BTreeMap::new();
        let err = broadcast_parameters(&comm, Params::Map(&mut map), 3);
        assert!(matches!(
            err,
            Err(Error::InvalidArgument { arg: "root_rank", .. })
        ));
    }

    #[test]
    fn test_empty_batch_ok() {
        let comm = NoOpCollective;
        let mut map = BTreeMap::new();
        broadcast_parameters(&comm, Params::Map(&mut map), 0).unwrap();
    }

    #[test]
    fn test_broadcast_tensor_noop() {
        let comm = NoOpCollective;
        let mut t = Tensor::from_slice(&[5.0f32, 10.0], &[2]);
        broadcast_tensor(&comm, &mut t, 0, "t").unwrap();
        assert_eq!(t.to_vec::<f32>().unwrap(), vec![5.0, 10.0]);
    }
}
