//! Rule Extractor (C8): turns a high-similarity simulation into a typed
//! `ProtectionRule` describing the invariant that would have blocked it.
use std::collections::HashMap;

use crypto::digest::Digest;
use crypto::sha3::Sha3;
use ethers::abi::decode;
use serde::{Deserialize, Serialize};

use crate::abi::FunctionSchema;
use crate::simulator::Simulation;
use crate::types::{word_to_be_bytes, Address, Slot, Word};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Check {
    Exact,
    Range { lo: Word, hi: Word },
    Pattern,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    Simple,
    Mapping,
    Array,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamRule {
    pub index: usize,
    pub name: Option<String>,
    pub ty: String,
    pub original: Word,
    pub modified: Word,
    pub check: Check,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputConstraint {
    #[serde(with = "selector_hex")]
    pub selector: [u8; 4],
    pub function_name: Option<String>,
    pub parameter_rules: Vec<ParamRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConstraint {
    pub contract: Address,
    pub slot: Slot,
    pub original: Word,
    pub modified: Word,
    pub check: Check,
    pub slot_kind: SlotKind,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtectionRule {
    pub rule_id: String,
    #[serde(with = "hash32_hex")]
    pub source_tx_hash: [u8; 32],
    pub contract: Address,
    pub similarity: f64,
    pub input_rules: Vec<InputConstraint>,
    pub storage_rules: Vec<StorageConstraint>,
    pub created_at: u64,
    pub active: bool,
}

mod selector_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 4], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 4], D::Error> {
        let raw = String::deserialize(d)?;
        let decoded =
            hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| serde::de::Error::custom("selector must be 4 bytes"))
    }
}

mod hash32_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(d)?;
        let decoded =
            hex::decode(raw.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| serde::de::Error::custom("hash must be 32 bytes"))
    }
}

/// Extraction thresholds: `similarity_threshold` is θ from the simulation
/// filter; `exact_vs_range_threshold` and `range_band` are the 10%/±20%
/// figures from the change-magnitude heuristic, made configurable rather
/// than literals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleExtractionConfig {
    pub similarity_threshold: f64,
    pub exact_vs_range_threshold: f64,
    pub range_band: f64,
}

impl Default for RuleExtractionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            exact_vs_range_threshold: 0.10,
            range_band: 0.20,
        }
    }
}

/// The fixed facts about the transaction under analysis that every rule
/// built from its simulations shares.
#[derive(Clone, Debug)]
pub struct RuleContext {
    pub source_tx_hash: [u8; 32],
    pub contract: Address,
    pub schema: Option<FunctionSchema>,
    pub baseline_input: Vec<u8>,
    pub baseline_storage: HashMap<Slot, Word>,
    pub created_at: u64,
}

/// Build one [`ProtectionRule`] per simulation that passed the `ok &&
/// similarity >= threshold` filter.
pub fn extract_rules(
    simulations: &[Simulation],
    ctx: &RuleContext,
    config: &RuleExtractionConfig,
) -> Vec<ProtectionRule> {
    simulations
        .iter()
        .filter(|s| s.ok && s.similarity >= config.similarity_threshold)
        .enumerate()
        .map(|(salt, simulation)| build_rule(simulation, ctx, config, salt as u64))
        .collect()
}

fn build_rule(
    simulation: &Simulation,
    ctx: &RuleContext,
    config: &RuleExtractionConfig,
    salt: u64,
) -> ProtectionRule {
    let mut input_rules = Vec::new();
    if let Some(modified_input) = &simulation.candidate.input {
        input_rules.push(build_input_constraint(
            &ctx.baseline_input,
            modified_input,
            ctx.schema.as_ref(),
            config,
        ));
    }

    let mut storage_rules: Vec<StorageConstraint> = simulation
        .candidate
        .storage_overrides
        .iter()
        .map(|(slot, modified)| {
            let original = ctx
                .baseline_storage
                .get(slot)
                .copied()
                .unwrap_or_default();
            build_storage_constraint(ctx.contract, *slot, original, *modified, config)
        })
        .collect();

    if input_rules.is_empty() && storage_rules.is_empty() {
        storage_rules.push(default_storage_constraint(ctx.contract));
    }

    let created_at = ctx.created_at.wrapping_add(salt);
    ProtectionRule {
        rule_id: rule_id(&ctx.source_tx_hash, ctx.contract, created_at),
        source_tx_hash: ctx.source_tx_hash,
        contract: ctx.contract,
        similarity: simulation.similarity,
        input_rules,
        storage_rules,
        created_at,
        active: true,
    }
}

fn build_input_constraint(
    baseline_input: &[u8],
    modified_input: &[u8],
    schema: Option<&FunctionSchema>,
    config: &RuleExtractionConfig,
) -> InputConstraint {
    let mut selector = [0u8; 4];
    let source = if modified_input.len() >= 4 {
        modified_input
    } else {
        baseline_input
    };
    selector.copy_from_slice(&source[..4.min(source.len())]);

    let schema = match schema {
        Some(schema) if baseline_input.len() >= 4 && modified_input.len() >= 4 => schema,
        _ => {
            return InputConstraint {
                selector,
                function_name: None,
                parameter_rules: vec![unknown_selector_rule(baseline_input, modified_input)],
            };
        }
    };

    let original_tokens = decode(&schema.inputs, &baseline_input[4..]);
    let modified_tokens = decode(&schema.inputs, &modified_input[4..]);

    let (original_tokens, modified_tokens) = match (original_tokens, modified_tokens) {
        (Ok(o), Ok(m)) => (o, m),
        _ => {
            return InputConstraint {
                selector,
                function_name: schema.name.clone(),
                parameter_rules: vec![unknown_selector_rule(baseline_input, modified_input)],
            };
        }
    };

    let parameter_rules = original_tokens
        .iter()
        .zip(modified_tokens.iter())
        .enumerate()
        .filter(|(_, (o, m))| o != m)
        .map(|(index, (original, modified))| {
            let original = token_to_word(original);
            let modified = token_to_word(modified);
            let check = if change_ratio(original, modified) > config.exact_vs_range_threshold {
                Check::Range {
                    lo: Word::zero(),
                    hi: modified.saturating_add(modified),
                }
            } else {
                Check::Exact
            };
            ParamRule {
                index,
                name: None,
                ty: format!("{:?}", schema.inputs[index]),
                original,
                modified,
                check,
            }
        })
        .collect();

    InputConstraint {
        selector,
        function_name: schema.name.clone(),
        parameter_rules,
    }
}

fn unknown_selector_rule(baseline_input: &[u8], modified_input: &[u8]) -> ParamRule {
    let original = hash_to_word(baseline_input.get(4..).unwrap_or(&[]));
    let modified = hash_to_word(modified_input.get(4..).unwrap_or(&[]));
    ParamRule {
        index: 0,
        name: None,
        ty: "bytes".to_string(),
        original,
        modified,
        check: Check::Exact,
    }
}

fn build_storage_constraint(
    contract: Address,
    slot: Slot,
    original: Word,
    modified: Word,
    config: &RuleExtractionConfig,
) -> StorageConstraint {
    let check = if change_ratio(original, modified) > config.exact_vs_range_threshold {
        let (lo, hi) = range_bounds(modified, config.range_band);
        Check::Range { lo, hi }
    } else {
        Check::Exact
    };
    StorageConstraint {
        contract,
        slot,
        original,
        modified,
        check,
        slot_kind: infer_slot_kind(slot),
    }
}

fn default_storage_constraint(contract: Address) -> StorageConstraint {
    StorageConstraint {
        contract,
        slot: Slot::from(1),
        original: Word::zero(),
        modified: Word::zero(),
        check: Check::Exact,
        slot_kind: SlotKind::Simple,
    }
}

fn infer_slot_kind(slot: Slot) -> SlotKind {
    if slot < Slot::from(1_000_000u64) {
        return SlotKind::Simple;
    }
    let bytes = word_to_be_bytes(slot);
    let ones: u32 = bytes.iter().map(|b| b.count_ones()).sum();
    if ones > 100 {
        SlotKind::Mapping
    } else {
        SlotKind::Array
    }
}

fn change_ratio(original: Word, modified: Word) -> f64 {
    if original.is_zero() {
        return if modified.is_zero() { 0.0 } else { 1.0 };
    }
    let diff = if modified > original {
        modified - original
    } else {
        original - modified
    };
    word_to_f64(diff) / word_to_f64(original)
}

fn range_bounds(modified: Word, band: f64) -> (Word, Word) {
    let m = word_to_f64(modified);
    let lo = (m * (1.0 - band)).max(0.0);
    let hi = m * (1.0 + band);
    (f64_to_word(lo), f64_to_word(hi))
}

fn word_to_f64(w: Word) -> f64 {
    w.to_string().parse::<f64>().unwrap_or(f64::MAX)
}

fn f64_to_word(x: f64) -> Word {
    if x <= 0.0 {
        Word::zero()
    } else {
        Word::from(x as u128)
    }
}

fn token_to_word(token: &ethers::abi::Token) -> Word {
    use ethers::abi::Token;
    match token {
        Token::Uint(v) | Token::Int(v) => {
            let mut bytes = [0u8; 32];
            v.to_big_endian(&mut bytes);
            Word::from_big_endian(&bytes)
        }
        Token::Bool(b) => Word::from(*b as u64),
        Token::Address(a) => Word::from_big_endian(a.as_bytes()),
        Token::FixedBytes(b) | Token::Bytes(b) => hash_to_word(b),
        Token::String(s) => hash_to_word(s.as_bytes()),
        other => hash_to_word(format!("{other:?}").as_bytes()),
    }
}

fn hash_to_word(bytes: &[u8]) -> Word {
    let mut hasher = Sha3::keccak256();
    hasher.input(bytes);
    let mut out = [0u8; 32];
    hasher.result(&mut out);
    Word::from_big_endian(&out)
}

fn rule_id(source_tx_hash: &[u8; 32], contract: Address, created_at: u64) -> String {
    let mut hasher = Sha3::keccak256();
    hasher.input(source_tx_hash);
    hasher.input(contract.as_bytes());
    hasher.input(&created_at.to_be_bytes());
    let mut out = [0u8; 32];
    hasher.result(&mut out);
    hex::encode(&out[..8])
}
