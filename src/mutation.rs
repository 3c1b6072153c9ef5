//! Mutation Manager (C5): deterministic, step-indexed perturbation of
//! calldata and storage slots, plus the Typed ABI Mutator's untyped
//! fallback. Every public function here is a pure mapping from
//! `(original, candidate index)` to a perturbed value or `None` — no
//! randomness, no shared state.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::abi::{mutate_typed, FunctionSchema};
use crate::types::{Slot, Word};

/// The step-based policy configuration: one ordered step list per kind of
/// perturbation, plus how many storage slots a single candidate may touch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutationConfig {
    pub input_steps: Vec<i64>,
    pub storage_steps: Vec<i64>,
    pub byte_steps: Vec<i8>,
    pub max_mutations_per_candidate: usize,
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            input_steps: vec![1, -1, 10, -10, 100, -100, 1000, -1000, 50, -50],
            storage_steps: vec![1, -1, 5, -5, 10, -10, 100, -100, 1000, -1000],
            byte_steps: vec![1, -1, 2, -2, 5, -5, 10, -10],
            max_mutations_per_candidate: 4,
        }
    }
}

/// Mutate `calldata` at candidate index `i`. Prefers the typed mutator when
/// `schema` is known; falls back to untyped byte perturbation of the
/// parameter region when it is not, or when the typed mutator declines.
/// Returns `None` only when no perturbation could be made to differ from
/// `calldata` (the candidate is then dropped by the caller).
pub fn mutate_input(
    calldata: &[u8],
    schema: Option<&FunctionSchema>,
    config: &MutationConfig,
    i: usize,
) -> Option<Vec<u8>> {
    if calldata.len() < 4 {
        return None;
    }
    if let Some(schema) = schema {
        let byte_step = config.byte_steps[i % config.byte_steps.len()];
        let int_step = config.input_steps[i % config.input_steps.len()];
        if let Some(out) = mutate_typed(calldata, schema, byte_step, int_step, i) {
            if out != calldata {
                return Some(out);
            }
        }
    }
    mutate_input_untyped(calldata, config, i)
}

fn mutate_input_untyped(calldata: &[u8], config: &MutationConfig, i: usize) -> Option<Vec<u8>> {
    let params = &calldata[4..];
    if params.is_empty() {
        return None;
    }
    let step = config.input_steps[i % config.input_steps.len()];
    let mut mutated = params.to_vec();

    match i % 3 {
        0 => add_as_be_integer(&mut mutated, step),
        1 => {
            let idx = i % mutated.len();
            mutated[idx] = mutated[idx].wrapping_add(step.rem_euclid(256) as u8);
        }
        _ => {
            for k in 0..3usize.min(mutated.len()) {
                let idx = (i + k) % mutated.len();
                let delta = step.rem_euclid(256) as u8;
                if k % 2 == 0 {
                    mutated[idx] = mutated[idx].wrapping_add(delta);
                } else {
                    mutated[idx] = mutated[idx].wrapping_sub(delta);
                }
            }
        }
    }

    let mutated = ensure_different_bytes(params, mutated)?;
    let mut out = calldata[..4].to_vec();
    out.extend(mutated);
    Some(out)
}

/// Treat `buf`'s leading 32 bytes (or all of it, if shorter) as a big-endian
/// unsigned integer, add `step`, and write the result back right-aligned
/// and zero-padded within the same region.
fn add_as_be_integer(buf: &mut [u8], step: i64) {
    let region_len = buf.len().min(32);
    let word = Word::from_big_endian(&buf[..region_len]);
    let mutated = wrapping_add_i64(word, step);
    let mut bytes32 = [0u8; 32];
    mutated.to_big_endian(&mut bytes32);
    buf[..region_len].copy_from_slice(&bytes32[32 - region_len..]);
}

/// The well-formedness guarantee's final rung: if the attempted mutation
/// happens to equal the original, emit 1 when the original was all-zero,
/// else emit all-zero. If even that does not differ (an empty buffer), the
/// candidate is dropped.
fn ensure_different_bytes(original: &[u8], mutated: Vec<u8>) -> Option<Vec<u8>> {
    if mutated != original {
        return Some(mutated);
    }
    if original.is_empty() {
        return None;
    }
    let mut alt = vec![0u8; original.len()];
    if original.iter().all(|b| *b == 0) {
        *alt.last_mut().unwrap() = 1;
    }
    if alt != original {
        Some(alt)
    } else {
        None
    }
}

/// Perturb up to `config.max_mutations_per_candidate` of `slots`' existing
/// entries at candidate index `i`. Never introduces a slot absent from
/// `slots`; slots whose mutation cannot be made to differ are omitted.
pub fn mutate_storage(
    slots: &HashMap<Slot, Word>,
    config: &MutationConfig,
    i: usize,
) -> HashMap<Slot, Word> {
    if slots.is_empty() {
        return HashMap::new();
    }
    let mut keys: Vec<Slot> = slots.keys().copied().collect();
    keys.sort();

    let count = config.max_mutations_per_candidate.min(keys.len()).max(1);
    let mut out = HashMap::new();
    for j in 0..count {
        let slot = keys[(i + j) % keys.len()];
        let original = slots[&slot];
        if let Some(mutated) = mutate_word(original, config, i + j) {
            out.insert(slot, mutated);
        }
    }
    out
}

fn mutate_word(original: Word, config: &MutationConfig, i: usize) -> Option<Word> {
    let step = config.storage_steps[i % config.storage_steps.len()];
    let magnitude = Word::from(step.unsigned_abs());

    let mutated = match i % 4 {
        0 => wrapping_add_i64(original, step),
        1 => {
            if magnitude > original {
                Word::zero()
            } else {
                original - magnitude
            }
        }
        2 => {
            let factor = Word::from(step.unsigned_abs().min(10));
            original.checked_mul(factor).unwrap_or(Word::MAX)
        }
        _ => {
            if original.is_zero() {
                original
            } else {
                original ^ magnitude
            }
        }
    };

    if mutated != original {
        return Some(mutated);
    }
    if original.is_zero() {
        Some(Word::from(1))
    } else {
        Some(Word::zero())
    }
}

fn wrapping_add_i64(value: Word, step: i64) -> Word {
    if step >= 0 {
        value.overflowing_add(Word::from(step as u64)).0
    } else {
        value.overflowing_sub(Word::from((-step) as u64)).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::{encode, ParamType, Token};
    use ethers::types::U256 as EthU256;

    fn calldata_with_u256(value: u64) -> Vec<u8> {
        let mut out = vec![0xa9, 0x05, 0x9c, 0xbb];
        out.extend(encode(&[Token::Uint(EthU256::from(value))]));
        out
    }

    #[test]
    fn s2_byte_flip_in_parameter_region() {
        // Selector 0xa9059cbb, single uint256 parameter = 100, steps = [1, -1], index 0.
        let config = MutationConfig {
            input_steps: vec![1, -1],
            ..MutationConfig::default()
        };
        let calldata = calldata_with_u256(100);
        let mutated = mutate_input(&calldata, None, &config, 0).unwrap();
        assert_eq!(&mutated[..4], &calldata[..4]);
        assert_eq!(*mutated.last().unwrap(), 101);
        let diff_count = mutated
            .iter()
            .zip(calldata.iter())
            .filter(|(a, b)| a != b)
            .count();
        assert_eq!(diff_count, 1);
    }

    #[test]
    fn s3_storage_add() {
        let mut slots = HashMap::new();
        slots.insert(Slot::from(1), Word::from(10));
        let config = MutationConfig {
            storage_steps: vec![5],
            max_mutations_per_candidate: 1,
            ..MutationConfig::default()
        };
        let mutated = mutate_storage(&slots, &config, 0);
        assert_eq!(mutated.len(), 1);
        assert_eq!(mutated[&Slot::from(1)], Word::from(15));
    }

    #[test]
    fn s4_storage_underflow_clamps_at_zero() {
        let mut slots = HashMap::new();
        slots.insert(Slot::from(1), Word::zero());
        let config = MutationConfig {
            storage_steps: vec![-100],
            max_mutations_per_candidate: 1,
            ..MutationConfig::default()
        };
        // index 1 selects sub-strategy 2 (subtract, clamp at zero) via i % 4 == 1.
        let mutated = mutate_storage(&slots, &config, 1);
        assert_eq!(mutated[&Slot::from(1)], Word::zero());
    }

    #[test]
    fn storage_mutation_never_introduces_new_slots() {
        let mut slots = HashMap::new();
        slots.insert(Slot::from(7), Word::from(3));
        let config = MutationConfig::default();
        for i in 0..20 {
            let mutated = mutate_storage(&slots, &config, i);
            assert!(mutated.keys().all(|k| slots.contains_key(k)));
        }
    }

    #[test]
    fn mutation_is_dropped_when_parameters_are_empty() {
        let calldata = vec![0xde, 0xad, 0xbe, 0xef];
        let config = MutationConfig::default();
        assert!(mutate_input(&calldata, None, &config, 0).is_none());
    }

    #[test]
    fn typed_mutation_is_preferred_when_schema_known() {
        let schema = FunctionSchema {
            selector: [0xa9, 0x05, 0x9c, 0xbb],
            name: None,
            inputs: vec![ParamType::Uint(256)],
        };
        let calldata = calldata_with_u256(100);
        let config = MutationConfig::default();
        let mutated = mutate_input(&calldata, Some(&schema), &config, 0).unwrap();
        assert_ne!(mutated, calldata);
    }
}
