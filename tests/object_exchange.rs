//! Multi-rank object broadcast/allgather tests over the in-process backend.

use std::thread;

use serde::{Deserialize, Serialize};
use syncr::comm::{Collective, LocalCollective, LocalGroup};
use syncr::{allgather_object, broadcast_object};

fn run_ranks<T, F>(world_size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(LocalCollective) -> T + Send + Sync + Clone + 'static,
{
    let group = LocalGroup::new(world_size);
    let handles: Vec<_> = group
        .endpoints()
        .into_iter()
        .map(|comm| {
            let f = f.clone();
            thread::spawn(move || f(comm))
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RunConfig {
    lr: f64,
    warmup_steps: u32,
    schedule: Vec<String>,
}

#[test]
fn test_broadcast_object_round_trip() {
    let canonical = RunConfig {
        lr: 3e-4,
        warmup_steps: 500,
        schedule: vec!["cosine".into(), "restart".into()],
    };
    let expected = canonical.clone();

    let results = run_ranks(3, move |comm| {
        let own = if comm.rank() == 2 {
            canonical.clone()
        } else {
            RunConfig::default()
        };
        broadcast_object(&comm, own, 2, None).unwrap()
    });

    for config in results {
        assert_eq!(config, expected);
    }
}

#[test]
fn test_broadcast_object_repeated_same_name() {
    // Back-to-back exchanges under the same default name must not collide.
    let results = run_ranks(2, |comm| {
        let root_value = |round: u64| round * 10 + 7;
        let mut received = Vec::new();
        for round in 0..3u64 {
            let own = if comm.rank() == 0 { root_value(round) } else { 0 };
            received.push(broadcast_object(&comm, own, 0, None).unwrap());
        }
        received
    });

    for received in results {
        assert_eq!(received, vec![7, 17, 27]);
    }
}

#[test]
fn test_allgather_object_rank_order() {
    for world_size in [1usize, 2, 4] {
        let results = run_ranks(world_size, |comm| {
            // Rank-dependent payload length exercises the ragged partition.
            let own = "x".repeat(comm.rank());
            allgather_object(&comm, &own, Some("ragged")).unwrap()
        });

        for gathered in results {
            assert_eq!(gathered.len(), world_size);
            for (rank, item) in gathered.iter().enumerate() {
                assert_eq!(item, &"x".repeat(rank));
            }
        }
    }
}

#[test]
fn test_allgather_object_structs() {
    let results = run_ranks(3, |comm| {
        let own = RunConfig {
            lr: comm.rank() as f64,
            warmup_steps: comm.rank() as u32 * 100,
            schedule: vec![format!("rank{}", comm.rank())],
        };
        allgather_object(&comm, &own, None).unwrap()
    });

    for gathered in results {
        for (rank, config) in gathered.iter().enumerate() {
            assert_eq!(config.lr, rank as f64);
            assert_eq!(config.warmup_steps, rank as u32 * 100);
            assert_eq!(config.schedule, vec![format!("rank{rank}")]);
        }
    }
}

#[test]
fn test_broadcast_then_allgather_interleaved() {
    // Mixed protocol traffic in lock-step across all ranks.
    let results = run_ranks(2, |comm| {
        let seed = broadcast_object(&comm, comm.rank() as u64 + 41, 0, Some("seed")).unwrap();
        let echoed = allgather_object(&comm, &(seed + comm.rank() as u64), Some("echo")).unwrap();
        (seed, echoed)
    });

    for (seed, echoed) in results {
        assert_eq!(seed, 41);
        assert_eq!(echoed, vec![41, 42]);
    }
}
