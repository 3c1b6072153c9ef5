//! Simulator Pool (C7): a fixed-size worker pool that replays each
//! candidate under the EVM harness and scores its path against the frozen
//! baseline.
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::generator::Candidate;
use crate::harness::{self, ChainPolicy, Header, Tx};
use crate::path::Path;
use crate::similarity::similarity;
use crate::snapshot::Snapshot;

/// The outcome of replaying one candidate, produced exactly once per
/// candidate received.
#[derive(Clone, Debug)]
pub struct Simulation {
    pub candidate: Candidate,
    pub path: Path,
    pub similarity: f64,
    pub ok: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Immutable context every worker shares: the materialized snapshot, the
/// frozen baseline path, and the transaction/chain parameters to replay
/// against. Workers hold only a reference; nothing here is mutated after
/// construction.
pub struct SimulationContext {
    pub snapshot: Arc<Snapshot>,
    pub baseline_path: Arc<Path>,
    pub header: Header,
    pub chain_id: u64,
    pub tx: Tx,
    pub policy: ChainPolicy,
}

/// Spawn `worker_count` threads that each loop: receive a candidate, replay
/// it, score it, send the result; exit once `candidates` closes. Blocks
/// until every worker has joined, which happens once the generator closes
/// the candidate channel and all in-flight candidates drain.
pub fn run_pool(
    worker_count: usize,
    ctx: &SimulationContext,
    candidates: Receiver<Candidate>,
    results: Sender<Simulation>,
) {
    std::thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let candidates = candidates.clone();
            let results = results.clone();
            scope.spawn(move || worker_loop(worker_id, ctx, candidates, results));
        }
    });
}

fn worker_loop(
    worker_id: usize,
    ctx: &SimulationContext,
    candidates: Receiver<Candidate>,
    results: Sender<Simulation>,
) {
    while let Ok(candidate) = candidates.recv() {
        let simulation = simulate_one(ctx, candidate);
        if results.send(simulation).is_err() {
            break;
        }
    }
    let _ = worker_id;
}

fn simulate_one(ctx: &SimulationContext, candidate: Candidate) -> Simulation {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        harness::execute(
            &ctx.snapshot,
            &ctx.header,
            ctx.chain_id,
            &ctx.tx,
            candidate.input.as_deref(),
            Some(&candidate.storage_overrides),
            &ctx.policy,
        )
    }));
    let duration = started.elapsed();

    match outcome {
        Ok(Ok(path)) => {
            let score = similarity(&ctx.baseline_path, &path);
            Simulation {
                ok: path.ok,
                similarity: score,
                path,
                candidate,
                error: None,
                duration,
            }
        }
        Ok(Err(err)) => {
            warn!(candidate_id = %candidate.id, error = %err, "simulation failed");
            Simulation {
                candidate,
                path: Path::new(),
                similarity: 0.0,
                ok: false,
                error: Some(err.to_string()),
                duration,
            }
        }
        Err(_) => {
            warn!(candidate_id = %candidate.id, "simulator worker panicked");
            Simulation {
                candidate,
                path: Path::new(),
                similarity: 0.0,
                ok: false,
                error: Some("worker panicked".to_string()),
                duration,
            }
        }
    }
}
