//! ABI Provider capability: concrete [`crate::abi::AbiProvider`] implementations.
//!
//! [`StaticAbiProvider`] holds a fixed selector -> schema map built once from
//! an ABI JSON document; lookups are infallible misses rather than panics, so
//! every caller treats an unknown selector the same way it treats a contract
//! with no known ABI at all.
use std::collections::HashMap;
use std::path::Path;

use ethers::abi::Abi;

use crate::abi::{AbiProvider, FunctionSchema};
use crate::error::ReplayError;

#[derive(Clone, Debug, Default)]
pub struct StaticAbiProvider {
    schemas: HashMap<[u8; 4], FunctionSchema>,
}

impl StaticAbiProvider {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: FunctionSchema) {
        self.schemas.insert(schema.selector, schema);
    }

    /// Parse a standard ABI JSON document (the `abi` array Etherscan and
    /// solc both emit) into schemas keyed by four-byte selector.
    pub fn from_abi_json(json: &str) -> Result<Self, ReplayError> {
        let abi: Abi = serde_json::from_str(json)
            .map_err(|e| ReplayError::MalformedTrace(format!("invalid abi json: {e}")))?;

        let mut provider = Self::empty();
        for function in abi.functions() {
            let selector = function.short_signature();
            provider.insert(FunctionSchema {
                selector,
                name: Some(function.name.clone()),
                inputs: function.inputs.iter().map(|p| p.kind.clone()).collect(),
            });
        }
        Ok(provider)
    }

    pub fn from_file(path: &Path) -> Result<Self, ReplayError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ReplayError::MalformedTrace(format!("reading abi file: {e}")))?;
        Self::from_abi_json(&raw)
    }
}

impl AbiProvider for StaticAbiProvider {
    fn schema_for(&self, selector: [u8; 4]) -> Option<FunctionSchema> {
        self.schemas.get(&selector).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERC20_ABI: &str = r#"[
        {
            "type": "function",
            "name": "transfer",
            "stateMutability": "nonpayable",
            "inputs": [
                {"name": "to", "type": "address"},
                {"name": "amount", "type": "uint256"}
            ],
            "outputs": [{"name": "", "type": "bool"}]
        }
    ]"#;

    #[test]
    fn known_selector_round_trips_to_schema() {
        let provider = StaticAbiProvider::from_abi_json(ERC20_ABI).unwrap();
        let schema = provider.schema_for([0xa9, 0x05, 0x9c, 0xbb]).unwrap();
        assert_eq!(schema.name.as_deref(), Some("transfer"));
        assert_eq!(schema.inputs.len(), 2);
    }

    #[test]
    fn unknown_selector_is_none_not_an_error() {
        let provider = StaticAbiProvider::from_abi_json(ERC20_ABI).unwrap();
        assert!(provider.schema_for([0, 0, 0, 0]).is_none());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(StaticAbiProvider::from_abi_json("not json").is_err());
    }
}
