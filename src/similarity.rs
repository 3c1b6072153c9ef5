//! Path-Similarity Function (C10): a pure scalar measure of positional
//! agreement between two jump sequences.
use crate::path::Path;

/// Index-aligned agreement between `a` and `b`, in `[0, 1]`.
///
/// Both empty paths are identical by convention (`1.0`); exactly one empty
/// path shares no structure with the other (`0.0`). Otherwise this counts
/// positions where both paths took the same jump and divides by the longer
/// path's length, so a divergence at position k propagates as non-match
/// through the tail — the desired signal for "same control flow, different
/// data".
pub fn similarity(a: &Path, b: &Path) -> f64 {
    let (a, b) = (a.jumps(), b.jumps());
    match (a.is_empty(), b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        _ => {}
    }

    let matches = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x == y)
        .count();
    matches as f64 / a.len().max(b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Jump;
    use crate::types::Address;

    fn path_of(jumps: &[(u8, u64, u64)]) -> Path {
        let mut p = Path::new();
        for (a, from, to) in jumps {
            p.push(Jump::new(Address::repeat_byte(*a), *from, *to));
        }
        p
    }

    #[test]
    fn both_empty_is_identical() {
        assert_eq!(similarity(&Path::new(), &Path::new()), 1.0);
    }

    #[test]
    fn one_empty_is_zero() {
        let p = path_of(&[(1, 0, 1)]);
        assert_eq!(similarity(&p, &Path::new()), 0.0);
        assert_eq!(similarity(&Path::new(), &p), 0.0);
    }

    #[test]
    fn identical_paths_score_one() {
        let p = path_of(&[(1, 0, 1), (1, 1, 2), (1, 2, 3)]);
        assert_eq!(similarity(&p, &p.clone()), 1.0);
    }

    #[test]
    fn symmetric() {
        let a = path_of(&[(1, 0, 1), (1, 1, 2)]);
        let b = path_of(&[(1, 0, 1), (1, 9, 9)]);
        assert_eq!(similarity(&a, &b), similarity(&b, &a));
    }

    #[test]
    fn divergence_propagates_through_the_tail() {
        let a = path_of(&[(1, 0, 1), (1, 1, 2), (1, 2, 3)]);
        let b = path_of(&[(1, 0, 1), (1, 5, 6), (1, 6, 7)]);
        // Only position 0 matches; positions 1 and 2 diverge even though
        // the sequences have the same length.
        assert!((similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn result_is_always_within_unit_range() {
        let a = path_of(&[(1, 0, 1)]);
        let b = path_of(&[(2, 9, 9), (2, 8, 8), (2, 7, 7)]);
        let s = similarity(&a, &b);
        assert!((0.0..=1.0).contains(&s));
    }
}
