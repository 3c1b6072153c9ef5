//! Common scalar types shared across the replay-and-mutation engine.
use primitive_types::{H160, U256};

/// Contract / externally-owned-account address.
pub type Address = H160;
/// 32-byte storage slot key.
pub type Slot = U256;
/// 32-byte storage slot value.
pub type Word = U256;

/// Convert a big-endian byte slice into a [`Word`], left-padding with zeroes.
pub fn word_from_be_slice(bytes: &[u8]) -> Word {
    Word::from_big_endian(bytes)
}

/// Convert a [`Word`] into its 32-byte big-endian representation.
pub fn word_to_be_bytes(word: Word) -> [u8; 32] {
    let mut out = [0u8; 32];
    word.to_big_endian(&mut out);
    out
}

/// True if every byte of `addr` is zero.
pub fn is_zero_address(addr: &Address) -> bool {
    addr.0.iter().all(|b| *b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_round_trips_through_bytes() {
        let w = Word::from(12345u64);
        let bytes = word_to_be_bytes(w);
        assert_eq!(word_from_be_slice(&bytes), w);
    }
}
