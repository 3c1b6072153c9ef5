//! Typed ABI Mutator (C9): given a function's decoded parameter schema,
//! perturb exactly one parameter in a way that preserves ABI validity.
//!
//! Used by the Mutation Manager (C5) whenever a schema is known for a
//! selector; untyped byte-level mutation is the fallback when it is not.
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address as EthAddress, U256 as EthU256};

use crate::types::Address;

/// A function's typed parameter list, as supplied by the ABI provider
/// capability (see [`crate::abi_provider`]).
#[derive(Clone, Debug)]
pub struct FunctionSchema {
    pub selector: [u8; 4],
    pub name: Option<String>,
    pub inputs: Vec<ParamType>,
}

/// Selector → parameter schema lookup. Absence of a schema for a selector is
/// non-fatal anywhere this is consumed: it just means mutation falls back to
/// the untyped byte-level strategy.
pub trait AbiProvider {
    fn schema_for(&self, selector: [u8; 4]) -> Option<FunctionSchema>;
}

/// Decode `calldata`'s parameter region against `schema`, mutate exactly one
/// parameter chosen by `candidate_index mod inputs.len()`, re-encode, and
/// reattach the selector. Returns `None` when the parameters cannot be
/// decoded against the schema, or the schema has no parameters to mutate;
/// callers fall back to untyped byte mutation in that case.
pub fn mutate_typed(
    calldata: &[u8],
    schema: &FunctionSchema,
    byte_step: i8,
    int_step: i64,
    candidate_index: usize,
) -> Option<Vec<u8>> {
    if schema.inputs.is_empty() || calldata.len() < 4 {
        return None;
    }
    let params = &calldata[4..];
    let mut tokens = decode(&schema.inputs, params).ok()?;

    let idx = candidate_index % tokens.len();
    let mutated = mutate_token(&tokens[idx], &schema.inputs[idx], byte_step, int_step)?;
    tokens[idx] = mutated;

    let mut out = schema.selector.to_vec();
    out.extend(encode(&tokens));
    Some(out)
}

fn mutate_token(token: &Token, ty: &ParamType, byte_step: i8, int_step: i64) -> Option<Token> {
    match (token, ty) {
        (Token::Uint(v), ParamType::Uint(bits)) => {
            let max = uint_max(*bits);
            Some(Token::Uint(step_clamped(*v, int_step, max)))
        }
        (Token::Int(v), ParamType::Int(_)) => Some(Token::Int(step_wrapping(*v, int_step))),
        (Token::Bool(v), ParamType::Bool) => Some(Token::Bool(!v)),
        (Token::Address(addr), ParamType::Address) => {
            let mut bytes = addr.0;
            let last = bytes[19] as i16 + byte_step as i16;
            bytes[19] = last.rem_euclid(256) as u8;
            Some(Token::Address(EthAddress::from(bytes)))
        }
        (Token::String(s), ParamType::String) => Some(Token::String(format!("{s}_mut"))),
        (Token::FixedBytes(bytes), ParamType::FixedBytes(_)) => {
            let mut out = bytes.clone();
            if let Some(last) = out.last_mut() {
                *last = (*last as i16 + byte_step as i16).rem_euclid(256) as u8;
            }
            Some(Token::FixedBytes(out))
        }
        _ => None,
    }
}

fn uint_max(bits: usize) -> EthU256 {
    if bits >= 256 {
        EthU256::MAX
    } else {
        (EthU256::from(1) << bits) - EthU256::from(1)
    }
}

fn step_clamped(v: EthU256, step: i64, max: EthU256) -> EthU256 {
    if step >= 0 {
        let added = v.saturating_add(EthU256::from(step as u64));
        added.min(max)
    } else {
        let magnitude = EthU256::from((-step) as u64);
        if magnitude > v {
            EthU256::zero()
        } else {
            v - magnitude
        }
    }
}

fn step_wrapping(v: EthU256, step: i64) -> EthU256 {
    if step >= 0 {
        v.overflowing_add(EthU256::from(step as u64)).0
    } else {
        v.overflowing_sub(EthU256::from((-step) as u64)).0
    }
}

/// Turn an [`Address`] into the low-level ethers Address used by the ABI
/// codec; kept separate so callers outside this module never need to know
/// about the ethers/primitive-types type split.
pub fn to_ethers_address(addr: Address) -> EthAddress {
    EthAddress::from(addr.0)
}
