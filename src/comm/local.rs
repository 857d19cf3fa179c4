//! In-process collective backend.
//!
//! Runs a fixed-size group of ranks as threads of one process, rendezvousing
//! through shared slots keyed by `(op kind, name, per-name sequence number)`.
//! The sequence number advances independently on each rank, so repeated use of
//! the same logical name lines up as long as every rank issues its collectives
//! in the same order, which is the lock-step requirement the protocol already imposes.
//! A mismatched sequence blocks forever, same as a real transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::comm::{Collective, CollectiveHandle};
use crate::dtype::DType;
use crate::error::{Error, Result};

/// Shared rendezvous state for one group.
struct GroupState {
    world_size: usize,
    slots: Mutex<HashMap<String, Slot>>,
    cv: Condvar,
}

enum Slot {
    Broadcast {
        /// Root's payload; `None` until the root arrives.
        data: Option<Vec<u8>>,
        /// Non-root ranks that have copied the payload out.
        consumed: usize,
    },
    Allgather {
        /// One contribution per rank.
        parts: Vec<Option<Vec<u8>>>,
        /// Ranks that have assembled their result and left.
        departed: usize,
    },
}

/// An in-process collective group.
///
/// Hand one [`LocalCollective`] endpoint to each rank thread:
///
/// ```
/// use syncr::comm::{Collective, LocalGroup};
///
/// let group = LocalGroup::new(2);
/// let endpoints = group.endpoints();
/// assert_eq!(endpoints[1].rank(), 1);
/// ```
pub struct LocalGroup {
    state: Arc<GroupState>,
}

impl LocalGroup {
    /// Create a group of `world_size` ranks.
    ///
    /// # Panics
    ///
    /// Panics if `world_size` is zero.
    pub fn new(world_size: usize) -> Self {
        assert!(world_size >= 1, "world_size must be at least 1");
        Self {
            state: Arc::new(GroupState {
                world_size,
                slots: Mutex::new(HashMap::new()),
                cv: Condvar::new(),
            }),
        }
    }

    /// Endpoint for one rank. Each rank must use exactly one endpoint.
    pub fn endpoint(&self, rank: usize) -> LocalCollective {
        assert!(rank < self.state.world_size, "rank out of range");
        LocalCollective {
            rank,
            state: Arc::clone(&self.state),
            seq: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    /// One endpoint per rank, in rank order.
    pub fn endpoints(&self) -> Vec<LocalCollective> {
        (0..self.state.world_size)
            .map(|r| self.endpoint(r))
            .collect()
    }
}

/// One rank's endpoint into a [`LocalGroup`].
pub struct LocalCollective {
    rank: usize,
    state: Arc<GroupState>,
    /// Per-(kind, name) call counter; disambiguates repeated names.
    seq: Mutex<HashMap<String, u64>>,
    /// Broadcasts issued but not yet waited on.
    pending: Mutex<HashMap<u64, PendingBroadcast>>,
    next_handle: AtomicU64,
}

struct PendingBroadcast {
    key: String,
    ptr: u64,
    nbytes: usize,
    root: usize,
}

impl LocalCollective {
    fn next_key(&self, kind: &str, name: &str) -> String {
        let mut seq = self.seq.lock();
        let n = seq.entry(format!("{kind}:{name}")).or_insert(0);
        let key = format!("{kind}:{name}:{n}");
        *n += 1;
        key
    }
}

impl Collective for LocalCollective {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.state.world_size
    }

    unsafe fn broadcast(
        &self,
        ptr: u64,
        count: usize,
        dtype: DType,
        root: usize,
        name: &str,
    ) -> Result<()> {
        let handle = self.broadcast_async(ptr, count, dtype, root, name)?;
        self.wait(handle)
    }

    unsafe fn broadcast_async(
        &self,
        ptr: u64,
        count: usize,
        dtype: DType,
        root: usize,
        name: &str,
    ) -> Result<CollectiveHandle> {
        if root >= self.state.world_size {
            return Err(Error::Comm {
                reason: format!(
                    "broadcast root {root} out of range for world size {}",
                    self.state.world_size
                ),
            });
        }

        let nbytes = count * dtype.size_bytes();
        let key = self.next_key("bcast", name);

        if self.rank == root {
            // Deposit the payload at issue time; peers copy it out during
            // their own wait.
            let bytes = std::slice::from_raw_parts(ptr as *const u8, nbytes).to_vec();
            let mut slots = self.state.slots.lock();
            slots.insert(
                key.clone(),
                Slot::Broadcast {
                    data: Some(bytes),
                    consumed: 0,
                },
            );
            self.state.cv.notify_all();
        }

        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(
            id,
            PendingBroadcast {
                key,
                ptr,
                nbytes,
                root,
            },
        );
        Ok(CollectiveHandle::new(id))
    }

    fn wait(&self, handle: CollectiveHandle) -> Result<()> {
        let pending =
            self.pending
                .lock()
                .remove(&handle.id())
                .ok_or_else(|| Error::Comm {
                    reason: format!("wait on unknown handle {}", handle.id()),
                })?;

        let mut slots = self.state.slots.lock();
        if self.rank == pending.root {
            // Block until every peer has copied the payload, then free the slot.
            loop {
                let drained = match slots.get(&pending.key) {
                    Some(Slot::Broadcast { consumed, .. }) => {
                        *consumed == self.state.world_size - 1
                    }
                    _ => {
                        return Err(Error::Comm {
                            reason: format!("broadcast slot '{}' corrupted", pending.key),
                        });
                    }
                };
                if drained {
                    slots.remove(&pending.key);
                    self.state.cv.notify_all();
                    return Ok(());
                }
                self.state.cv.wait(&mut slots);
            }
        } else {
            loop {
                if let Some(Slot::Broadcast { data, consumed }) = slots.get_mut(&pending.key) {
                    if let Some(bytes) = data {
                        if bytes.len() != pending.nbytes {
                            return Err(Error::Comm {
                                reason: format!(
                                    "broadcast '{}' size mismatch: root sent {} bytes, \
                                     local buffer holds {}",
                                    pending.key,
                                    bytes.len(),
                                    pending.nbytes
                                ),
                            });
                        }
                        // Safety: caller contract of broadcast_async; ptr is
                        // valid for nbytes until this wait returns.
                        unsafe {
                            std::slice::from_raw_parts_mut(
                                pending.ptr as *mut u8,
                                pending.nbytes,
                            )
                            .copy_from_slice(bytes);
                        }
                        *consumed += 1;
                        self.state.cv.notify_all();
                        return Ok(());
                    }
                }
                self.state.cv.wait(&mut slots);
            }
        }
    }

    fn allgather(&self, src: &[u8], _dtype: DType, name: &str) -> Result<Vec<u8>> {
        let key = self.next_key("agather", name);
        let world_size = self.state.world_size;

        let mut slots = self.state.slots.lock();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot::Allgather {
            parts: vec![None; world_size],
            departed: 0,
        });
        match slot {
            Slot::Allgather { parts, .. } => {
                if parts[self.rank].is_some() {
                    return Err(Error::Comm {
                        reason: format!("duplicate allgather arrival for '{key}'"),
                    });
                }
                parts[self.rank] = Some(src.to_vec());
            }
            _ => {
                return Err(Error::Comm {
                    reason: format!("allgather slot '{key}' corrupted"),
                });
            }
        }
        self.state.cv.notify_all();

        // Wait for every contribution, assemble in rank order, and let the
        // last rank out free the slot.
        loop {
            if let Some(Slot::Allgather { parts, .. }) = slots.get(&key) {
                if parts.iter().all(|p| p.is_some()) {
                    break;
                }
            }
            self.state.cv.wait(&mut slots);
        }

        let result = match slots.get(&key) {
            Some(Slot::Allgather { parts, .. }) => {
                let mut out = Vec::new();
                for part in parts {
                    out.extend_from_slice(part.as_ref().expect("all parts present"));
                }
                out
            }
            _ => unreachable!("slot checked above"),
        };

        let last_out = match slots.get_mut(&key) {
            Some(Slot::Allgather { departed, .. }) => {
                *departed += 1;
                *departed == world_size
            }
            _ => false,
        };
        if last_out {
            slots.remove(&key);
        }
        self.state.cv.notify_all();

        Ok(result)
    }
}
