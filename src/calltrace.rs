//! Call-Trace Extractor (C4): walks an RPC call trace and pulls out every
//! sub-call that touches a protected contract.
use std::collections::HashSet;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// One frame of the `trace_call_path` result tree.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CallFrame {
    #[serde(rename = "type", default)]
    pub call_type: String,
    pub from: Address,
    pub to: Address,
    #[serde(default)]
    pub input: Bytes,
    #[serde(default)]
    pub value: primitive_types::U256,
    #[serde(default)]
    pub gas: u64,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub calls: Vec<CallFrame>,
}

/// One sub-call whose `from` or `to` intersects the protected-contract set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedCall {
    pub address: Address,
    pub from: Address,
    pub input: Bytes,
    pub call_type: String,
    pub value: primitive_types::U256,
    pub gas: u64,
    pub depth: u32,
}

/// Depth-first traversal of `call_trace`, emitting one [`ExtractedCall`] per
/// frame whose `from` is protected, or whose `to` is protected and whose
/// input is non-empty. Children are always traversed regardless of whether
/// the current frame matched.
pub fn extract(call_trace: &CallFrame, protected: &HashSet<Address>) -> Vec<ExtractedCall> {
    let mut out = Vec::new();
    walk(call_trace, protected, 0, &mut out);
    out
}

fn walk(frame: &CallFrame, protected: &HashSet<Address>, depth: u32, out: &mut Vec<ExtractedCall>) {
    let from_protected = protected.contains(&frame.from);
    let to_protected = protected.contains(&frame.to) && !frame.input.is_empty();

    if from_protected || to_protected {
        out.push(ExtractedCall {
            address: frame.to,
            from: frame.from,
            input: frame.input.clone(),
            call_type: frame.call_type.clone(),
            value: frame.value,
            gas: frame.gas,
            depth,
        });
    }

    for child in &frame.calls {
        walk(child, protected, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(b: u8) -> Address {
        Address::repeat_byte(b)
    }

    fn leaf(from: Address, to: Address, input: &[u8]) -> CallFrame {
        CallFrame {
            call_type: "CALL".into(),
            from,
            to,
            input: Bytes::copy_from_slice(input),
            value: Default::default(),
            gas: 0,
            gas_used: 0,
            calls: vec![],
        }
    }

    #[test]
    fn extracts_single_protected_subcall_at_correct_depth() {
        let x = addr(1);
        let y = addr(2);
        let p = addr(3);

        let mut root = leaf(x, y, &[]);
        root.calls.push(leaf(y, p, &[0x01]));

        let protected: HashSet<Address> = [p].into_iter().collect();
        let extracted = extract(&root, &protected);

        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].address, p);
        assert_eq!(extracted[0].from, y);
        assert_eq!(extracted[0].depth, 1);
    }

    #[test]
    fn empty_input_to_protected_contract_is_not_extracted() {
        let y = addr(2);
        let p = addr(3);
        let root = leaf(y, p, &[]);
        let protected: HashSet<Address> = [p].into_iter().collect();
        assert!(extract(&root, &protected).is_empty());
    }

    #[test]
    fn from_protected_is_extracted_even_with_empty_input() {
        let p = addr(3);
        let y = addr(2);
        let root = leaf(p, y, &[]);
        let protected: HashSet<Address> = [p].into_iter().collect();
        let extracted = extract(&root, &protected);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].from, p);
    }

    #[test]
    fn children_are_traversed_even_when_parent_does_not_match() {
        let x = addr(1);
        let y = addr(2);
        let z = addr(4);
        let p = addr(3);

        let mut root = leaf(x, y, &[0x01]);
        let mut mid = leaf(y, z, &[0x02]);
        mid.calls.push(leaf(z, p, &[0x03]));
        root.calls.push(mid);

        let protected: HashSet<Address> = [p].into_iter().collect();
        let extracted = extract(&root, &protected);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].depth, 2);
    }
}
