//! Orchestrator (C11): wires the Prestate Loader, EVM Harness, Call-Trace
//! Extractor, Candidate Generator, Simulator Pool, and Rule Extractor into
//! one per-transaction analysis run, then hands the successful rules to the
//! broadcast capability.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::bounded;
use tracing::info;

use crate::abi::AbiProvider;
use crate::calltrace;
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::generator::{self, GeneratorConfig};
use crate::harness::{self, Tx};
use crate::rules::{self, ProtectionRule, RuleContext};
use crate::simulator::{self, SimulationContext};
use crate::snapshot::load_snapshot;
use crate::types::Address;

#[tracing::instrument(skip(rpc, abi_provider))]
pub fn run(
    tx_hash: [u8; 32],
    rpc: &impl crate::onchain::rpc::RpcClient,
    abi_provider: Option<&dyn AbiProvider>,
    config: &ReplayConfig,
) -> Result<Vec<ProtectionRule>, ReplayError> {
    // 1. Fetch transaction, receipt, header; fetch prestate; build Snapshot.
    let transaction = rpc.tx_by_hash(tx_hash)?;
    let receipt = rpc.receipt_by_hash(tx_hash)?;
    let header = rpc.header_by_number(receipt.block_number)?;
    let prestate = rpc.trace_prestate(tx_hash)?;
    let (snapshot, storage_by_address) = load_snapshot(&prestate);
    let snapshot = Arc::new(snapshot);

    let tx = Tx {
        from: transaction.from,
        to: transaction.to,
        input: transaction.input.clone(),
        value: transaction.value,
        gas: transaction.gas,
        gas_price: transaction.gas_price,
        nonce: transaction.nonce,
    };

    // 2. Run the harness once with no overrides; freeze the baseline path.
    let baseline_path = harness::execute(
        &snapshot,
        &header,
        config.chain_id,
        &tx,
        None,
        None,
        &config.chain_policy,
    )?;
    let baseline_path = Arc::new(baseline_path);
    info!(jumps = baseline_path.len(), "baseline path captured");

    // 3. Extract protected-contract sub-calls; pick the mutation baseline.
    let protected: HashSet<Address> = config.protected_contracts.iter().copied().collect();
    let call_trace = rpc.trace_call_path(tx_hash)?;
    let mut extracted_calls = calltrace::extract(&call_trace, &protected);
    let source_call = if config.prefer_first_extracted_call {
        extracted_calls.drain(..).next()
    } else {
        extracted_calls.pop()
    };

    let (baseline_input, baseline_contract) = match &source_call {
        Some(call) => (call.input.to_vec(), call.address),
        None => (
            transaction.input.to_vec(),
            transaction.to.unwrap_or_default(),
        ),
    };
    let baseline_storage = storage_by_address
        .get(&baseline_contract)
        .cloned()
        .unwrap_or_default();

    let schema = match baseline_input.get(..4) {
        Some(selector) => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(selector);
            abi_provider.and_then(|provider| provider.schema_for(buf))
        }
        None => None,
    };

    // 4. Start the Simulator Pool and the Candidate Generator.
    let (candidate_tx, candidate_rx) = bounded(256);
    let (result_tx, result_rx) = bounded(256);
    let (stop_tx, stop_rx) = bounded::<()>(1);

    let sim_ctx = SimulationContext {
        snapshot: snapshot.clone(),
        baseline_path: baseline_path.clone(),
        header: header.clone(),
        chain_id: config.chain_id,
        tx: tx.clone(),
        policy: config.chain_policy,
    };
    let mutation_config = Arc::new(config.mutation.clone());
    let generator_config = GeneratorConfig {
        max_candidates: config.max_candidates,
        deadline: config.deadline(),
    };
    let deadline = Instant::now() + config.deadline();

    let mut rule_set = Vec::new();
    let rule_ctx = RuleContext {
        source_tx_hash: tx_hash,
        contract: baseline_contract,
        schema: schema.clone(),
        baseline_input: baseline_input.clone(),
        baseline_storage: baseline_storage.clone(),
        created_at: header.timestamp,
    };

    std::thread::scope(|scope| {
        scope.spawn(move || {
            generator::run(
                &baseline_input,
                &baseline_storage,
                schema,
                source_call,
                mutation_config,
                generator_config,
                candidate_tx,
                stop_rx,
            );
        });

        let sim_ctx_ref = &sim_ctx;
        scope.spawn(move || {
            simulator::run_pool(config.worker_count, sim_ctx_ref, candidate_rx, result_tx);
        });

        // 5. Drain results until the success cap is hit or the deadline passes.
        while rule_set.len() < config.max_success {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match result_rx.recv_timeout(remaining) {
                Ok(simulation) => {
                    rule_set.extend(rules::extract_rules(
                        &[simulation],
                        &rule_ctx,
                        &config.rule_extraction,
                    ));
                }
                Err(_) => break,
            }
        }

        // 6. Send stop, then drain to close: workers finish in-flight
        // candidates and drop their result-channel clones, which ends this
        // iterator once the pool and generator threads exit.
        let _ = stop_tx.try_send(());
        drop(stop_tx);
        for simulation in result_rx.iter() {
            if rule_set.len() < config.max_success {
                rule_set.extend(rules::extract_rules(
                    &[simulation],
                    &rule_ctx,
                    &config.rule_extraction,
                ));
            }
        }
    });

    info!(rule_count = rule_set.len(), "orchestration complete");
    Ok(rule_set)
}
