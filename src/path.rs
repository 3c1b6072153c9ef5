//! The recorded control-flow trace of a single instrumented execution (C1 data model).
use crypto::digest::Digest;
use crypto::sha3::Sha3;
use serde::{Deserialize, Serialize};

use crate::types::Address;

/// A single taken control-flow transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jump {
    pub contract: Address,
    pub from_pc: u64,
    pub to_pc: u64,
}

impl Jump {
    pub fn new(contract: Address, from_pc: u64, to_pc: u64) -> Self {
        Self {
            contract,
            from_pc,
            to_pc,
        }
    }

    fn write_into(&self, hasher: &mut Sha3) {
        hasher.input(self.contract.as_bytes());
        hasher.input(&self.from_pc.to_be_bytes());
        hasher.input(&self.to_pc.to_be_bytes());
    }
}

/// An ordered sequence of [`Jump`]s produced by one instrumented execution.
///
/// A `Path` starts open (mutable via [`Path::push`]) and is frozen once
/// [`crate::tracer::JumpTracer::stop`] hands it back; nothing outside this module
/// constructs a `Path` directly from a running trace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Path {
    jumps: Vec<Jump>,
    pub ok: bool,
    pub gas_used: u64,
}

impl Path {
    pub fn new() -> Self {
        Self {
            jumps: Vec::new(),
            ok: true,
            gas_used: 0,
        }
    }

    pub fn push(&mut self, jump: Jump) {
        self.jumps.push(jump);
    }

    pub fn jumps(&self) -> &[Jump] {
        &self.jumps
    }

    pub fn len(&self) -> usize {
        self.jumps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jumps.is_empty()
    }

    /// Cryptographic digest of the serialized jump sequence. Two paths with
    /// equal hashes are considered equal regardless of `ok`/`gas_used`.
    pub fn hash(&self) -> String {
        let mut hasher = Sha3::keccak256();
        for jump in &self.jumps {
            jump.write_into(&mut hasher);
        }
        let mut out = [0u8; 32];
        hasher.result(&mut out);
        hex::encode(out)
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.hash() == other.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Address;

    fn jump(a: u8, from: u64, to: u64) -> Jump {
        Jump::new(Address::repeat_byte(a), from, to)
    }

    #[test]
    fn empty_path_has_stable_hash() {
        let a = Path::new();
        let b = Path::new();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn hash_is_deterministic_and_order_sensitive() {
        let mut a = Path::new();
        a.push(jump(1, 10, 20));
        a.push(jump(1, 20, 30));

        let mut b = Path::new();
        b.push(jump(1, 10, 20));
        b.push(jump(1, 20, 30));
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a, b);

        let mut c = Path::new();
        c.push(jump(1, 20, 30));
        c.push(jump(1, 10, 20));
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn serialize_round_trip_preserves_jumps() {
        let mut p = Path::new();
        p.push(jump(2, 1, 2));
        p.gas_used = 42;
        let json = serde_json::to_string(&p).unwrap();
        let back: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(p.jumps(), back.jumps());
        assert_eq!(p.hash(), back.hash());
    }
}
