//! Protection broadcast: converts successful candidates into signed
//! dynamic-fee transactions against a live protection contract, submitted
//! one at a time through the RPC capability's `send_raw`.
use std::thread;
use std::time::Duration;

use ethers::core::types::transaction::eip2718::TypedTransaction;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip1559::Eip1559TransactionRequest;
use ethers::types::{Bytes as EthBytes, U256 as EthU256};
use tracing::warn;

use crate::abi::to_ethers_address;
use crate::error::ReplayError;
use crate::onchain::rpc::RpcClient;
use crate::types::{Address, Word};

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    pub tip_cap: Word,
    pub fee_cap: Word,
    pub gas_limit: u64,
    pub inter_submission_delay: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            tip_cap: Word::from(1_500_000_000u64),
            fee_cap: Word::from(30_000_000_000u64),
            gas_limit: 500_000,
            inter_submission_delay: Duration::from_millis(200),
        }
    }
}

/// Signs and submits candidate calldata against one fixed protection
/// contract. Nonce management is strictly sequential: the internal counter
/// only advances after a transaction is signed, and [`broadcast_all`]
/// submits one at a time rather than racing the node with several
/// outstanding transactions.
pub struct Broadcaster<R> {
    rpc: R,
    wallet: LocalWallet,
    chain_id: u64,
    protection_contract: Address,
    nonce: u64,
    config: BroadcastConfig,
}

impl<R: RpcClient> Broadcaster<R> {
    pub fn new(
        rpc: R,
        wallet: LocalWallet,
        chain_id: u64,
        protection_contract: Address,
        config: BroadcastConfig,
    ) -> Result<Self, ReplayError> {
        let sender = to_ethers_address_local(wallet.address());
        let nonce = rpc.tx_count(sender)?;
        Ok(Self {
            rpc,
            wallet,
            chain_id,
            protection_contract,
            nonce,
            config,
        })
    }

    /// Sign and submit one candidate's raw input as the call data of a
    /// zero-value call to the protection contract. Advances the nonce only
    /// once signing succeeds.
    pub fn broadcast_one(&mut self, input: &[u8]) -> Result<[u8; 32], ReplayError> {
        let request: TypedTransaction = Eip1559TransactionRequest::new()
            .to(to_ethers_address(self.protection_contract))
            .value(EthU256::zero())
            .data(EthBytes::from(input.to_vec()))
            .nonce(EthU256::from(self.nonce))
            .max_priority_fee_per_gas(word_to_ethers(self.config.tip_cap))
            .max_fee_per_gas(word_to_ethers(self.config.fee_cap))
            .gas(EthU256::from(self.config.gas_limit))
            .chain_id(self.chain_id)
            .into();

        let signature = self
            .wallet
            .sign_transaction_sync(&request)
            .map_err(|e| ReplayError::Infrastructural(format!("signing failed: {e}")))?;

        let raw = request.rlp_signed(&signature);
        let hash = self.rpc.send_raw(&raw)?;
        self.nonce += 1;
        Ok(hash)
    }

    /// Submit every candidate input in order, logging (not aborting on)
    /// individual failures, with a small delay between submissions so the
    /// node has a chance to see each nonce land before the next is sent.
    pub fn broadcast_all(
        &mut self,
        inputs: impl IntoIterator<Item = Vec<u8>>,
    ) -> Vec<Result<[u8; 32], ReplayError>> {
        let mut results = Vec::new();
        for input in inputs {
            let outcome = self.broadcast_one(&input);
            if let Err(err) = &outcome {
                warn!(error = %err, "protection broadcast failed");
            }
            results.push(outcome);
            thread::sleep(self.config.inter_submission_delay);
        }
        results
    }
}

fn word_to_ethers(word: Word) -> EthU256 {
    let mut bytes = [0u8; 32];
    word.to_big_endian(&mut bytes);
    EthU256::from_big_endian(&bytes)
}

fn to_ethers_address_local(addr: ethers::types::Address) -> Address {
    Address::from_slice(addr.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calltrace::CallFrame;
    use crate::harness::Header;
    use crate::snapshot::PrestateAccount;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeRpc {
        nonce: u64,
        sent: Mutex<Vec<Vec<u8>>>,
        attempts: Mutex<usize>,
        fail_on_attempt: Option<usize>,
    }

    impl RpcClient for FakeRpc {
        fn tx_by_hash(&self, _hash: [u8; 32]) -> Result<crate::onchain::rpc::Transaction, ReplayError> {
            unimplemented!()
        }
        fn receipt_by_hash(&self, _hash: [u8; 32]) -> Result<crate::onchain::rpc::Receipt, ReplayError> {
            unimplemented!()
        }
        fn header_by_number(&self, _number: u64) -> Result<Header, ReplayError> {
            unimplemented!()
        }
        fn trace_prestate(
            &self,
            _hash: [u8; 32],
        ) -> Result<HashMap<Address, PrestateAccount>, ReplayError> {
            unimplemented!()
        }
        fn trace_call_path(&self, _hash: [u8; 32]) -> Result<CallFrame, ReplayError> {
            unimplemented!()
        }
        fn send_raw(&self, tx_bytes: &[u8]) -> Result<[u8; 32], ReplayError> {
            let mut attempts = self.attempts.lock().unwrap();
            *attempts += 1;
            if self.fail_on_attempt == Some(*attempts) {
                return Err(ReplayError::Rpc("node rejected transaction".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(tx_bytes.to_vec());
            Ok([sent.len() as u8; 32])
        }
        fn tx_count(&self, _address: Address) -> Result<u64, ReplayError> {
            Ok(self.nonce)
        }
    }

    fn test_wallet() -> LocalWallet {
        "0000000000000000000000000000000000000000000000000000000000000001"
            .parse()
            .unwrap()
    }

    #[test]
    fn nonce_advances_only_on_successful_submission() {
        let rpc = FakeRpc {
            nonce: 5,
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            fail_on_attempt: None,
        };
        let mut broadcaster = Broadcaster::new(
            rpc,
            test_wallet(),
            1,
            Address::repeat_byte(0x10),
            BroadcastConfig {
                inter_submission_delay: Duration::from_millis(0),
                ..BroadcastConfig::default()
            },
        )
        .unwrap();

        assert_eq!(broadcaster.nonce, 5);
        broadcaster.broadcast_one(&[1, 2, 3]).unwrap();
        assert_eq!(broadcaster.nonce, 6);
    }

    #[test]
    fn a_failed_submission_does_not_abort_the_remaining_batch() {
        let rpc = FakeRpc {
            nonce: 0,
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
            fail_on_attempt: Some(2),
        };
        let mut broadcaster = Broadcaster::new(
            rpc,
            test_wallet(),
            1,
            Address::repeat_byte(0x10),
            BroadcastConfig {
                inter_submission_delay: Duration::from_millis(0),
                ..BroadcastConfig::default()
            },
        )
        .unwrap();

        let results = broadcaster.broadcast_all(vec![vec![1], vec![2], vec![3]]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());
    }
}
