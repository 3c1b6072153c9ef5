//! Candidate Generator (C6): drives the Mutation Manager to emit a bounded
//! stream of perturbed candidates on a channel.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::abi::FunctionSchema;
use crate::calltrace::ExtractedCall;
use crate::mutation::{mutate_input, mutate_storage, MutationConfig};
use crate::types::{Slot, Word};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateKind {
    InputOnly,
    StorageOnly,
    Both,
}

/// A proposed perturbation of calldata and/or storage slots relative to a
/// baseline. At least one of `input` or `storage_overrides` always differs
/// from the baseline; the generator never emits a no-op candidate.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub id: String,
    pub kind: CandidateKind,
    pub input: Option<Vec<u8>>,
    pub storage_overrides: HashMap<Slot, Word>,
    pub source_call: Option<ExtractedCall>,
}

#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub max_candidates: usize,
    pub deadline: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_candidates: 10_000,
            deadline: Duration::from_secs(60),
        }
    }
}

/// Drive the Mutation Manager, emitting candidates on `out` until `stop`
/// fires, `max_candidates` is reached, or `deadline` elapses. Runs to
/// completion synchronously; the orchestrator owns placing this on its own
/// thread.
pub fn run(
    baseline_input: &[u8],
    baseline_storage: &HashMap<Slot, Word>,
    schema: Option<FunctionSchema>,
    source_call: Option<ExtractedCall>,
    mutation_config: Arc<MutationConfig>,
    generator_config: GeneratorConfig,
    out: Sender<Candidate>,
    stop: Receiver<()>,
) {
    let deadline = Instant::now() + generator_config.deadline;
    let mut emitted = 0usize;

    for i in 0..generator_config.max_candidates {
        if stop.try_recv().is_ok() || Instant::now() >= deadline {
            break;
        }

        let kind = match i % 3 {
            0 => CandidateKind::InputOnly,
            1 => CandidateKind::StorageOnly,
            _ => CandidateKind::Both,
        };

        let candidate = match build_candidate(
            i,
            kind,
            baseline_input,
            baseline_storage,
            schema.as_ref(),
            &mutation_config,
            &source_call,
        ) {
            Some(candidate) => candidate,
            None => continue,
        };

        if out.send(candidate).is_err() {
            break;
        }
        emitted += 1;
    }

    debug!(emitted, "candidate generator exhausted");
}

fn build_candidate(
    i: usize,
    kind: CandidateKind,
    baseline_input: &[u8],
    baseline_storage: &HashMap<Slot, Word>,
    schema: Option<&FunctionSchema>,
    config: &MutationConfig,
    source_call: &Option<ExtractedCall>,
) -> Option<Candidate> {
    let mut input = None;
    let mut storage_overrides = HashMap::new();

    if matches!(kind, CandidateKind::InputOnly | CandidateKind::Both) {
        input = mutate_input(baseline_input, schema, config, i);
    }
    if matches!(kind, CandidateKind::StorageOnly | CandidateKind::Both) {
        storage_overrides = mutate_storage(baseline_storage, config, i);
    }

    if kind == CandidateKind::Both && input.is_none() && storage_overrides.is_empty() {
        // Neither side mutated on the first attempt; retry once at index
        // i+1 before giving up on this id.
        input = mutate_input(baseline_input, schema, config, i + 1);
        if input.is_none() {
            storage_overrides = mutate_storage(baseline_storage, config, i + 1);
        }
    }

    let input_differs = input.as_deref().is_some_and(|b| b != baseline_input);
    if !input_differs && storage_overrides.is_empty() {
        return None;
    }

    Some(Candidate {
        id: format!("cand-{i}"),
        kind,
        input,
        storage_overrides,
        source_call: source_call.clone(),
    })
}
