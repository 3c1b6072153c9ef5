//! RPC capability: the read side of the external interface this engine
//! consumes, grounded in the teacher's `OnChainConfig` request pattern but
//! returning typed [`ReplayError`]s instead of panicking on malformed
//! responses.
use std::collections::HashMap;

use bytes::Bytes;
use serde_json::{json, Value};

use crate::calltrace::CallFrame;
use crate::error::ReplayError;
use crate::harness::Header;
use crate::snapshot::PrestateAccount;
use crate::types::{Address, Word};

#[derive(Clone, Debug)]
pub struct Transaction {
    pub hash: [u8; 32],
    pub from: Address,
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: Word,
    pub gas: u64,
    pub gas_price: Word,
    pub nonce: u64,
}

#[derive(Clone, Debug)]
pub struct Receipt {
    pub block_number: u64,
    pub gas_used: u64,
}

/// Everything the core needs to know about a chain to drive one replay.
/// Node-backed by [`JsonRpcClient`] in production; trivially fakeable in
/// tests.
pub trait RpcClient {
    fn tx_by_hash(&self, hash: [u8; 32]) -> Result<Transaction, ReplayError>;
    fn receipt_by_hash(&self, hash: [u8; 32]) -> Result<Receipt, ReplayError>;
    fn header_by_number(&self, number: u64) -> Result<Header, ReplayError>;
    fn trace_prestate(
        &self,
        hash: [u8; 32],
    ) -> Result<HashMap<Address, PrestateAccount>, ReplayError>;
    fn trace_call_path(&self, hash: [u8; 32]) -> Result<CallFrame, ReplayError>;
    fn send_raw(&self, tx_bytes: &[u8]) -> Result<[u8; 32], ReplayError>;
    fn tx_count(&self, address: Address) -> Result<u64, ReplayError>;
}

/// A JSON-RPC client over a blocking HTTP connection.
pub struct JsonRpcClient {
    endpoint_url: String,
    client: reqwest::blocking::Client,
}

impl JsonRpcClient {
    pub fn new(endpoint_url: String) -> Self {
        Self {
            endpoint_url,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn call(&self, method: &str, params: Value) -> Result<Value, ReplayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        let resp = self
            .client
            .post(&self.endpoint_url)
            .json(&body)
            .send()
            .map_err(|e| ReplayError::Rpc(format!("{method} request failed: {e}")))?;
        let parsed: Value = resp
            .json()
            .map_err(|e| ReplayError::Rpc(format!("{method} response was not JSON: {e}")))?;
        if let Some(error) = parsed.get("error") {
            return Err(ReplayError::Rpc(format!("{method} returned error: {error}")));
        }
        parsed
            .get("result")
            .cloned()
            .ok_or_else(|| ReplayError::Rpc(format!("{method} response missing `result`")))
    }
}

fn hex_to_u64(v: &Value) -> Result<u64, ReplayError> {
    let s = v
        .as_str()
        .ok_or_else(|| ReplayError::MalformedTrace(format!("expected hex string, got {v}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ReplayError::MalformedTrace(format!("bad hex integer {s}: {e}")))
}

fn hex_to_word(v: &Value) -> Result<Word, ReplayError> {
    let s = v
        .as_str()
        .ok_or_else(|| ReplayError::MalformedTrace(format!("expected hex string, got {v}")))?;
    Word::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| ReplayError::MalformedTrace(format!("bad hex word {s}: {e}")))
}

fn hex_to_address(v: &Value) -> Result<Address, ReplayError> {
    let s = v
        .as_str()
        .ok_or_else(|| ReplayError::MalformedTrace(format!("expected address string, got {v}")))?;
    let decoded = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| ReplayError::MalformedTrace(format!("bad address {s}: {e}")))?;
    if decoded.len() != 20 {
        return Err(ReplayError::MalformedTrace(format!(
            "address {s} is not 20 bytes"
        )));
    }
    Ok(Address::from_slice(&decoded))
}

fn hex_to_bytes(v: &Value) -> Result<Bytes, ReplayError> {
    let s = v
        .as_str()
        .ok_or_else(|| ReplayError::MalformedTrace(format!("expected byte string, got {v}")))?;
    let decoded = hex::decode(s.trim_start_matches("0x"))
        .map_err(|e| ReplayError::MalformedTrace(format!("bad bytes {s}: {e}")))?;
    Ok(Bytes::from(decoded))
}

fn hex_to_hash32(v: &Value) -> Result<[u8; 32], ReplayError> {
    let bytes = hex_to_bytes(v)?;
    if bytes.len() != 32 {
        return Err(ReplayError::MalformedTrace("expected 32-byte hash".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

impl RpcClient for JsonRpcClient {
    fn tx_by_hash(&self, hash: [u8; 32]) -> Result<Transaction, ReplayError> {
        let params = json!([format!("0x{}", hex::encode(hash))]);
        let v = self.call("eth_getTransactionByHash", params)?;
        Ok(Transaction {
            hash,
            from: hex_to_address(&v["from"])?,
            to: match v.get("to") {
                Some(Value::Null) | None => None,
                Some(to) => Some(hex_to_address(to)?),
            },
            input: hex_to_bytes(&v["input"])?,
            value: hex_to_word(&v["value"])?,
            gas: hex_to_u64(&v["gas"])?,
            gas_price: hex_to_word(&v["gasPrice"])?,
            nonce: hex_to_u64(&v["nonce"])?,
        })
    }

    fn receipt_by_hash(&self, hash: [u8; 32]) -> Result<Receipt, ReplayError> {
        let params = json!([format!("0x{}", hex::encode(hash))]);
        let v = self.call("eth_getTransactionReceipt", params)?;
        Ok(Receipt {
            block_number: hex_to_u64(&v["blockNumber"])?,
            gas_used: hex_to_u64(&v["gasUsed"])?,
        })
    }

    fn header_by_number(&self, number: u64) -> Result<Header, ReplayError> {
        let params = json!([format!("0x{:x}", number), false]);
        let v = self.call("eth_getBlockByNumber", params)?;
        Ok(Header {
            number: hex_to_u64(&v["number"])?,
            timestamp: hex_to_u64(&v["timestamp"])?,
            coinbase: hex_to_address(&v["miner"])?,
            base_fee: v
                .get("baseFeePerGas")
                .map(hex_to_word)
                .transpose()?
                .unwrap_or_default(),
            gas_limit: hex_to_u64(&v["gasLimit"])?,
            difficulty: v
                .get("difficulty")
                .map(hex_to_word)
                .transpose()?
                .unwrap_or_default(),
        })
    }

    fn trace_prestate(
        &self,
        hash: [u8; 32],
    ) -> Result<HashMap<Address, PrestateAccount>, ReplayError> {
        let params = json!([
            format!("0x{}", hex::encode(hash)),
            {"tracer": "prestateTracer"}
        ]);
        let v = self.call("debug_traceTransaction", params)?;
        let object = v
            .as_object()
            .ok_or_else(|| ReplayError::MalformedTrace("prestate trace was not an object".into()))?;

        let mut out = HashMap::with_capacity(object.len());
        for (addr, entry) in object {
            let address = hex_to_address(&Value::String(addr.clone()))?;
            let balance = entry.get("balance").map(hex_to_word).transpose()?;
            let nonce = entry.get("nonce").and_then(Value::as_u64);
            let code = entry.get("code").map(hex_to_bytes).transpose()?;
            let storage = match entry.get("storage").and_then(Value::as_object) {
                Some(map) => {
                    let mut parsed = HashMap::with_capacity(map.len());
                    for (slot, word) in map {
                        let slot = Word::from_str_radix(slot.trim_start_matches("0x"), 16)
                            .map_err(|e| ReplayError::MalformedTrace(format!("bad slot {slot}: {e}")))?;
                        parsed.insert(slot, hex_to_word(word)?);
                    }
                    Some(parsed)
                }
                None => None,
            };
            out.insert(
                address,
                PrestateAccount {
                    balance,
                    nonce,
                    code,
                    storage,
                },
            );
        }
        Ok(out)
    }

    fn trace_call_path(&self, hash: [u8; 32]) -> Result<CallFrame, ReplayError> {
        let params = json!([
            format!("0x{}", hex::encode(hash)),
            {"tracer": "callTracer"}
        ]);
        let v = self.call("debug_traceTransaction", params)?;
        parse_call_frame(&v)
    }

    fn send_raw(&self, tx_bytes: &[u8]) -> Result<[u8; 32], ReplayError> {
        let params = json!([format!("0x{}", hex::encode(tx_bytes))]);
        let v = self.call("eth_sendRawTransaction", params)?;
        hex_to_hash32(&v)
    }

    fn tx_count(&self, address: Address) -> Result<u64, ReplayError> {
        let params = json!([format!("0x{}", hex::encode(address.as_bytes())), "pending"]);
        let v = self.call("eth_getTransactionCount", params)?;
        hex_to_u64(&v)
    }
}

fn parse_call_frame(v: &Value) -> Result<CallFrame, ReplayError> {
    let calls = match v.get("calls").and_then(Value::as_array) {
        Some(arr) => arr
            .iter()
            .map(parse_call_frame)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(CallFrame {
        call_type: v
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("CALL")
            .to_string(),
        from: hex_to_address(&v["from"])?,
        to: hex_to_address(&v["to"])?,
        input: v.get("input").map(hex_to_bytes).transpose()?.unwrap_or_default(),
        value: v
            .get("value")
            .map(hex_to_word)
            .transpose()?
            .unwrap_or_default(),
        gas: v.get("gas").map(hex_to_u64).transpose()?.unwrap_or_default(),
        gas_used: v
            .get("gasUsed")
            .map(hex_to_u64)
            .transpose()?
            .unwrap_or_default(),
        calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_call_frame_tree() {
        let json = json!({
            "type": "CALL",
            "from": "0x0000000000000000000000000000000000000001",
            "to": "0x0000000000000000000000000000000000000002",
            "input": "0xdeadbeef",
            "value": "0x0",
            "gas": "0x5208",
            "gasUsed": "0x5208",
            "calls": [{
                "type": "CALL",
                "from": "0x0000000000000000000000000000000000000002",
                "to": "0x0000000000000000000000000000000000000003",
                "input": "0x",
                "value": "0x0",
                "gas": "0x100",
                "gasUsed": "0x64",
            }],
        });
        let frame = parse_call_frame(&json).unwrap();
        assert_eq!(frame.calls.len(), 1);
        assert_eq!(frame.calls[0].gas_used, 0x64);
    }

    #[test]
    fn rejects_hash_with_wrong_length() {
        let v = Value::String("0xdead".into());
        assert!(hex_to_hash32(&v).is_err());
    }

    #[test]
    fn missing_result_surfaces_as_rpc_error() {
        let v = json!({"jsonrpc": "2.0", "id": 1});
        let err = v
            .get("result")
            .cloned()
            .ok_or_else(|| ReplayError::Rpc("missing `result`".to_string()));
        assert!(err.is_err());
    }
}
