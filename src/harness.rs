//! EVM Harness (C3): instantiate an instrumented EVM against a materialized
//! snapshot and execute a single call or create, recording its jump path.
use std::collections::HashMap;

use bytes::Bytes;
use crypto::digest::Digest;
use crypto::sha3::Sha3;
use primitive_types::{H256, U256};
use revm::{
    Bytecode, CallInputs, Contract, CreateInputs, Env, Gas, Host, Interpreter, LatestSpec, Return,
    SelfDestructResult, Spec,
};
use rlp::RlpStream;
use serde::{Deserialize, Serialize};

use crate::error::ReplayError;
use crate::path::Path;
use crate::snapshot::Snapshot;
use crate::tracer::{JumpTracer, OpcodeContext, StackView};
use crate::types::{Address, Slot, Word};

/// Mainnet Shanghai activation time, used as the floor timestamp when a
/// chain's policy forces PUSH0 support on regardless of the header's actual
/// time.
const PUSH0_ACTIVATION_TIMESTAMP: u64 = 1_681_338_455;

/// Per-chain replay policy: which hardforks get forced active regardless of
/// what the original block height/time would imply.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ChainPolicy {
    pub force_push0: bool,
}

impl ChainPolicy {
    /// Default policy for the chains this system is known to replay against:
    /// ETH, BSC, POLYGON and MUMBAI all force PUSH0 on; any other chain id
    /// defaults to off until a deployment opts in.
    pub fn for_chain_id(chain_id: u64) -> Self {
        let force_push0 = matches!(chain_id, 1 | 56 | 137 | 80001);
        Self { force_push0 }
    }
}

/// The subset of a block header the harness needs to build an execution
/// environment.
#[derive(Clone, Debug)]
pub struct Header {
    pub number: u64,
    pub timestamp: u64,
    pub coinbase: Address,
    pub base_fee: Word,
    pub gas_limit: u64,
    pub difficulty: Word,
}

/// The subset of a transaction the harness needs to execute it. `from` is
/// the sender already recovered from the transaction's signature by the
/// caller (the RPC capability in `§6` owns signature verification).
#[derive(Clone, Debug)]
pub struct Tx {
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: Word,
    pub gas: u64,
    pub gas_price: Word,
    pub nonce: u64,
}

struct StackSlice<'a>(&'a Vec<U256>);

impl<'a> StackView for StackSlice<'a> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn peek(&self, idx_from_top: usize) -> Word {
        self.0[self.0.len() - 1 - idx_from_top]
    }
}

/// Read-only view over the snapshot plus a per-execution overlay of storage
/// writes and newly deployed code; dropped at the end of `execute()`.
struct ReplayHost<'a> {
    snapshot: &'a Snapshot,
    storage_overlay: HashMap<Address, HashMap<Slot, Word>>,
    code_overlay: HashMap<Address, Bytecode>,
    env: Env,
    tracer: JumpTracer,
}

impl<'a> ReplayHost<'a> {
    fn code_for(&self, address: &Address) -> Bytecode {
        if let Some(code) = self.code_overlay.get(address) {
            return code.clone();
        }
        match self.snapshot.account(address) {
            Some(account) if !account.code.is_empty() => {
                Bytecode::new_raw(account.code.clone()).to_analysed::<LatestSpec>()
            }
            _ => Bytecode::new(),
        }
    }
}

impl<'a> Host for ReplayHost<'a> {
    const INSPECT: bool = true;
    type DB = revm::db::BenchmarkDB;

    fn step(&mut self, interp: &mut Interpreter, _is_static: bool) -> Return {
        let pc = interp.program_counter() as u64;
        let op = unsafe { *interp.instruction_pointer };
        let stack = StackSlice(interp.stack.data());
        self.tracer.on_opcode(
            pc,
            op,
            OpcodeContext {
                address: interp.contract.address,
                stack: &stack,
            },
        );
        Return::Continue
    }

    fn step_end(&mut self, _interp: &mut Interpreter, _is_static: bool, _ret: Return) -> Return {
        Return::Continue
    }

    fn env(&mut self) -> &mut Env {
        &mut self.env
    }

    fn load_account(&mut self, _address: Address) -> Option<(bool, bool)> {
        Some((true, true))
    }

    fn block_hash(&mut self, _number: U256) -> Option<H256> {
        Some(H256::zero())
    }

    fn balance(&mut self, address: Address) -> Option<(U256, bool)> {
        let balance = self
            .snapshot
            .account(&address)
            .map(|a| a.balance)
            .unwrap_or_default();
        Some((balance, true))
    }

    fn code(&mut self, address: Address) -> Option<(Bytecode, bool)> {
        Some((self.code_for(&address), true))
    }

    fn code_hash(&mut self, _address: Address) -> Option<(H256, bool)> {
        Some((H256::zero(), true))
    }

    fn sload(&mut self, address: Address, index: U256) -> Option<(U256, bool)> {
        if let Some(value) = self.storage_overlay.get(&address).and_then(|m| m.get(&index)) {
            return Some((*value, true));
        }
        let value = self
            .snapshot
            .account(&address)
            .and_then(|a| a.storage.get(&index))
            .copied()
            .unwrap_or_default();
        Some((value, true))
    }

    fn sstore(
        &mut self,
        address: Address,
        index: U256,
        value: U256,
    ) -> Option<(U256, U256, U256, bool)> {
        self.storage_overlay
            .entry(address)
            .or_default()
            .insert(index, value);
        Some((U256::zero(), U256::zero(), U256::zero(), true))
    }

    fn log(&mut self, _address: Address, _topics: Vec<H256>, _data: Bytes) {}

    fn selfdestruct(&mut self, _address: Address, _target: Address) -> Option<SelfDestructResult> {
        Some(SelfDestructResult::default())
    }

    fn create<SPEC: Spec>(
        &mut self,
        _inputs: &mut CreateInputs,
    ) -> (Return, Option<Address>, Gas, Bytes) {
        // Nested CREATE is not exercised by replay: the transactions this
        // system replays are calls into already-deployed protected
        // contracts, never factory deployments several frames deep.
        (Return::Continue, Some(Address::zero()), Gas::new(0), Bytes::new())
    }

    fn call<SPEC: Spec>(&mut self, input: &mut CallInputs) -> (Return, Gas, Bytes) {
        let code = self.code_for(&input.contract);
        if code.is_empty() {
            return (Return::Continue, Gas::new(0), Bytes::new());
        }
        let mut interp = Interpreter::new::<SPEC>(
            Contract::new_with_context::<SPEC>(input.input.clone(), code, &input.context),
            1e10 as u64,
        );
        let ret = interp.run::<Self, SPEC>(self);
        (ret, Gas::new(0), interp.return_value())
    }
}

fn compute_create_address(sender: Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(&sender.as_bytes());
    stream.append(&nonce);
    let mut hasher = Sha3::keccak256();
    hasher.input(&stream.out());
    let mut out = [0u8; 32];
    hasher.result(&mut out);
    Address::from_slice(&out[12..])
}

/// Execute one transaction against `snapshot`, recording its jump path.
///
/// `input_override` replaces the transaction's own calldata when present
/// (used by the mutation pipeline); `storage_overrides` are applied to the
/// transaction's target contract only, per the harness contract. Execution
/// failures (revert, out-of-gas, opcode faults) are recorded on the
/// returned [`Path`] (`ok = false`); only state that cannot be materialized
/// into a runnable EVM surfaces as a [`ReplayError`].
pub fn execute(
    snapshot: &Snapshot,
    header: &Header,
    chain_id: u64,
    tx: &Tx,
    input_override: Option<&[u8]>,
    storage_overrides: Option<&HashMap<Slot, Word>>,
    policy: &ChainPolicy,
) -> Result<Path, ReplayError> {
    let execution_timestamp = if policy.force_push0 {
        header.timestamp.max(PUSH0_ACTIVATION_TIMESTAMP)
    } else {
        header.timestamp
    };

    let mut env = Env::default();
    env.cfg.chain_id = U256::from(chain_id);
    env.block.number = U256::from(header.number);
    env.block.timestamp = U256::from(execution_timestamp);
    env.block.coinbase = header.coinbase;
    env.block.basefee = header.base_fee;
    env.block.gas_limit = U256::from(header.gas_limit);
    env.block.difficulty = header.difficulty;
    env.tx.caller = tx.from;
    env.tx.gas_limit = tx.gas;
    env.tx.gas_price = tx.gas_price;
    env.tx.value = tx.value;

    let mut storage_overlay = HashMap::new();
    if let (Some(target), Some(overrides)) = (tx.to, storage_overrides) {
        if !overrides.is_empty() {
            storage_overlay.insert(target, overrides.clone());
        }
    }

    let mut host = ReplayHost {
        snapshot,
        storage_overlay,
        code_overlay: HashMap::new(),
        env,
        tracer: JumpTracer::start(),
    };

    let input = match input_override {
        Some(bytes) => Bytes::copy_from_slice(bytes),
        None => tx.input.clone(),
    };

    let ret = match tx.to {
        Some(target) => {
            let code = host.code_for(&target);
            let contract = Contract::new::<LatestSpec>(input, code, target, tx.from, tx.value);
            let mut interp = Interpreter::new::<LatestSpec>(contract, tx.gas);
            interp.run::<ReplayHost, LatestSpec>(&mut host)
        }
        None => {
            let created = compute_create_address(tx.from, tx.nonce);
            let contract = Contract::new::<LatestSpec>(
                Bytes::new(),
                Bytecode::new_raw(input),
                created,
                tx.from,
                tx.value,
            );
            let mut interp = Interpreter::new::<LatestSpec>(contract, tx.gas);
            interp.run::<ReplayHost, LatestSpec>(&mut host)
        }
    };

    if !matches!(ret, Return::Return | Return::Stop) {
        host.tracer.mark_failed();
    }
    // Gas accounting is disabled crate-wide (see the `no_gas_measuring`
    // feature on the `revm` dependency), so `gas_used` stays at its default.
    Ok(host.tracer.stop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{load_snapshot, PrestateAccount};
    use std::collections::HashMap as Map;

    fn header() -> Header {
        Header {
            number: 18_000_000,
            timestamp: 1_000,
            coinbase: Address::zero(),
            base_fee: Word::zero(),
            gas_limit: 30_000_000,
            difficulty: Word::zero(),
        }
    }

    #[test]
    fn execute_records_unconditional_jump() {
        // PUSH1 0x04; JUMP; STOP (unreachable); JUMPDEST; STOP
        let code = vec![0x60, 0x04, 0x56, 0x00, 0x5b, 0x00];
        let target = Address::repeat_byte(0xAB);

        let mut prestate = Map::new();
        prestate.insert(
            target,
            PrestateAccount {
                balance: None,
                nonce: None,
                code: Some(Bytes::from(code)),
                storage: None,
            },
        );
        let (snapshot, _) = load_snapshot(&prestate);

        let tx = Tx {
            from: Address::repeat_byte(0x01),
            to: Some(target),
            input: Bytes::new(),
            value: Word::zero(),
            gas: 1_000_000,
            gas_price: Word::zero(),
            nonce: 0,
        };

        let path = execute(
            &snapshot,
            &header(),
            1,
            &tx,
            None,
            None,
            &ChainPolicy::for_chain_id(1),
        )
        .unwrap();

        assert!(path.ok);
        assert_eq!(path.len(), 1);
        assert_eq!(path.jumps()[0].contract, target);
        assert_eq!(path.jumps()[0].from_pc, 2);
        assert_eq!(path.jumps()[0].to_pc, 4);
    }

    #[test]
    fn execute_marks_failure_on_revert() {
        // PUSH1 0x00; PUSH1 0x00; REVERT
        let code = vec![0x60, 0x00, 0x60, 0x00, 0xfd];
        let target = Address::repeat_byte(0xCD);

        let mut prestate = Map::new();
        prestate.insert(
            target,
            PrestateAccount {
                balance: None,
                nonce: None,
                code: Some(Bytes::from(code)),
                storage: None,
            },
        );
        let (snapshot, _) = load_snapshot(&prestate);

        let tx = Tx {
            from: Address::repeat_byte(0x01),
            to: Some(target),
            input: Bytes::new(),
            value: Word::zero(),
            gas: 1_000_000,
            gas_price: Word::zero(),
            nonce: 0,
        };

        let path = execute(
            &snapshot,
            &header(),
            1,
            &tx,
            None,
            None,
            &ChainPolicy::for_chain_id(1),
        )
        .unwrap();

        assert!(!path.ok);
        assert!(path.is_empty());
    }

    #[test]
    fn chain_policy_forces_push0_on_known_chains() {
        assert!(ChainPolicy::for_chain_id(1).force_push0);
        assert!(ChainPolicy::for_chain_id(56).force_push0);
        assert!(!ChainPolicy::for_chain_id(999).force_push0);
    }
}
