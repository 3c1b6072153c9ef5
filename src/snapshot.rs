//! Prestate Loader (C2): turns an RPC prestate trace into an in-memory
//! account + storage + code snapshot.
use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{Address, Slot, Word};

/// One account's pre-execution state as reported by `trace_prestate`. Every
/// field is optional because the remote tracer only reports what the
/// transaction actually touched.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PrestateAccount {
    pub balance: Option<Word>,
    pub nonce: Option<u64>,
    #[serde(with = "bytes_hex", default)]
    pub code: Option<Bytes>,
    pub storage: Option<HashMap<Slot, Word>>,
}

mod bytes_hex {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(b) => s.serialize_str(&format!("0x{}", hex::encode(b))),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            Some(s) => {
                let trimmed = s.trim_start_matches("0x");
                let decoded = hex::decode(trimmed).map_err(serde::de::Error::custom)?;
                Ok(Some(Bytes::from(decoded)))
            }
            None => Ok(None),
        }
    }
}

/// A single account's materialized pre-execution state. At most one
/// `AccountSnapshot` exists per address within a [`Snapshot`].
#[derive(Clone, Debug, Default)]
pub struct AccountSnapshot {
    pub address: Address,
    pub nonce: u64,
    pub balance: Word,
    pub code: Bytes,
    pub storage: HashMap<Slot, Word>,
}

impl AccountSnapshot {
    fn empty(address: Address) -> Self {
        Self {
            address,
            nonce: 0,
            balance: Word::zero(),
            code: Bytes::new(),
            storage: HashMap::new(),
        }
    }
}

/// An immutable, per-transaction materialization of every account the
/// transaction's prestate trace touched. Never mutated after construction;
/// replay overrides are applied to a derived working state instead (see
/// [`crate::harness`]).
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    accounts: HashMap<Address, AccountSnapshot>,
}

impl Snapshot {
    pub fn account(&self, address: &Address) -> Option<&AccountSnapshot> {
        self.accounts.get(address)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountSnapshot> {
        self.accounts.values()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Build a [`Snapshot`] from a raw prestate trace, and separately hand back
/// every contract's storage map (the mutation manager needs this to know
/// which slots are eligible for perturbation; see [`crate::mutation`]).
///
/// Code bytes are copied verbatim: this loader does not validate them
/// against any hardfork configuration, that responsibility belongs to the
/// EVM harness (C3).
pub fn load_snapshot(
    prestate: &HashMap<Address, PrestateAccount>,
) -> (Snapshot, HashMap<Address, HashMap<Slot, Word>>) {
    let mut accounts = HashMap::with_capacity(prestate.len());
    let mut storage_by_address = HashMap::new();

    for (address, entry) in prestate {
        let account = accounts
            .entry(*address)
            .or_insert_with(|| AccountSnapshot::empty(*address));

        if let Some(balance) = entry.balance {
            account.balance = balance;
        }
        if let Some(nonce) = entry.nonce {
            account.nonce = nonce;
        }
        if let Some(code) = &entry.code {
            account.code = code.clone();
        }
        if let Some(storage) = &entry.storage {
            account.storage.extend(storage.iter().map(|(k, v)| (*k, *v)));
            if !storage.is_empty() {
                storage_by_address
                    .entry(*address)
                    .or_insert_with(HashMap::new)
                    .extend(storage.iter().map(|(k, v)| (*k, *v)));
            }
        }
    }

    (Snapshot { accounts }, storage_by_address)
}
