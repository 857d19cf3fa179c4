//! Object exchange protocol.
//!
//! Broadcasts or allgathers arbitrary serializable objects over the
//! fixed-shape collective primitives. Serialized size varies by object
//! content and is unknown to the other ranks, so every exchange is two-phase:
//! a size transfer under `{name}.sz` establishes the payload shape, then the
//! payload moves under `{name}.t`. The distinct suffixes keep concurrent
//! exchanges with different object names from colliding.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::comm::Collective;
use crate::distributed::params::broadcast_tensor;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::Tensor;

fn encode<T: Serialize>(obj: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(obj, bincode::config::standard()).map_err(|e| {
        Error::Serialization {
            reason: format!("encode failed: {e}"),
        }
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (obj, read) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| Error::Serialization {
            reason: format!("decode failed: {e}"),
        })?;
    if read != bytes.len() {
        return Err(Error::ProtocolViolation {
            reason: format!(
                "payload holds {} bytes but decoding consumed {read}",
                bytes.len()
            ),
        });
    }
    Ok(obj)
}

/// Partition boundaries over a concatenated allgather payload: prefix sums of
/// the per-rank size vector.
fn partition_offsets(sizes: &[u32]) -> Vec<(usize, usize)> {
    let mut offsets = Vec::with_capacity(sizes.len());
    let mut start = 0usize;
    for &size in sizes {
        let end = start + size as usize;
        offsets.push((start, end));
        start = end;
    }
    offsets
}

/// Serialize and broadcast an object from `root_rank` to all ranks.
///
/// Every rank passes its own `obj`; the root's survives, the others are
/// replaced by the decoded copy of the root's. `name` defaults to the type
/// name and must be unique among concurrently in-flight exchanges.
///
/// ```
/// use syncr::comm::NoOpCollective;
/// use syncr::distributed::broadcast_object;
///
/// let comm = NoOpCollective;
/// let steps: u64 = broadcast_object(&comm, 42u64, 0, None).unwrap();
/// assert_eq!(steps, 42);
/// ```
pub fn broadcast_object<T>(
    comm: &dyn Collective,
    obj: T,
    root_rank: usize,
    name: Option<&str>,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    if root_rank >= comm.world_size() {
        return Err(Error::InvalidArgument {
            arg: "root_rank",
            reason: format!(
                "rank {root_rank} out of range for world size {}",
                comm.world_size()
            ),
        });
    }
    let name = name.unwrap_or_else(|| std::any::type_name::<T>());

    if comm.rank() == root_rank {
        let bytes = encode(&obj)?;
        let len = u32::try_from(bytes.len()).map_err(|_| Error::InvalidArgument {
            arg: "obj",
            reason: format!("serialized payload of {} bytes exceeds u32", bytes.len()),
        })?;
        trace!(name, len, "broadcasting object payload");

        let mut size = Tensor::scalar(len);
        broadcast_tensor(comm, &mut size, root_rank, &format!("{name}.sz"))?;

        let mut payload = Tensor::from_bytes(bytes);
        broadcast_tensor(comm, &mut payload, root_rank, &format!("{name}.t"))?;

        Ok(obj)
    } else {
        let mut size = Tensor::scalar(0u32);
        broadcast_tensor(comm, &mut size, root_rank, &format!("{name}.sz"))?;
        let len = size.item::<u32>()? as usize;

        let mut payload = Tensor::from_bytes(vec![0u8; len]);
        broadcast_tensor(comm, &mut payload, root_rank, &format!("{name}.t"))?;

        decode(payload.as_bytes())
    }
}

/// Serialize and allgather one object from every rank.
///
/// Returns a vector of length `world_size`, ordered by rank, identical on
/// every rank.
pub fn allgather_object<T>(comm: &dyn Collective, obj: &T, name: Option<&str>) -> Result<Vec<T>>
where
    T: Serialize + DeserializeOwned,
{
    let name = name.unwrap_or_else(|| std::any::type_name::<T>());
    let world_size = comm.world_size();

    let bytes = encode(obj)?;
    let len = u32::try_from(bytes.len()).map_err(|_| Error::InvalidArgument {
        arg: "obj",
        reason: format!("serialized payload of {} bytes exceeds u32", bytes.len()),
    })?;
    trace!(name, len, "allgathering object payload");

    let size_bytes = comm.allgather(&len.to_ne_bytes(), DType::U32, &format!("{name}.sz"))?;
    if size_bytes.len() != world_size * 4 {
        return Err(Error::ProtocolViolation {
            reason: format!(
                "gathered size vector holds {} bytes, expected {}",
                size_bytes.len(),
                world_size * 4
            ),
        });
    }
    let sizes: Vec<u32> = size_bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let gathered = comm.allgather(&bytes, DType::U8, &format!("{name}.t"))?;
    let total: usize = sizes.iter().map(|&s| s as usize).sum();
    if gathered.len() != total {
        return Err(Error::ProtocolViolation {
            reason: format!(
                "gathered payload holds {} bytes but size vector sums to {total}",
                gathered.len()
            ),
        });
    }

    partition_offsets(&sizes)
        .into_iter()
        .map(|(start, end)| decode(&gathered[start..end]))
        .collect()
}
