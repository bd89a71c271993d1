//! Packed bit-key addressing (C1).
//!
//! A [`Key`] is a fixed-width tuple of unsigned words ("segments"). Each
//! variable owns a contiguous bit field within one segment, assigned by
//! [`crate::variable::VariableList`]. The reserved all-ones bit pattern
//! within a variable's field means "don't care" (wildcard), which is what
//! makes [`Key`] double as both a data key and a projection mask.
//!
//! Keys are small (real models rarely need more than a handful of 32-bit
//! segments), so the segment buffer is a [`SmallVec`] with inline capacity 4
//! — the common case never touches the heap (ADR-1).

use smallvec::SmallVec;
use std::fmt;

use crate::error::RaError;

/// One packed word of a [`Key`].
pub type Segment = u32;

/// Inline capacity for the segment buffer; chosen so that models with up to
/// ~4 × 32 packed bits (enough for dozens of binary variables) never
/// allocate.
pub const INLINE_SEGMENTS: usize = 4;

/// A packed, fixed-width tuple of segments addressed through a
/// [`crate::variable::VariableList`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    segments: SmallVec<[Segment; INLINE_SEGMENTS]>,
}

impl Key {
    /// A key of the given length with every segment fully wildcard
    /// (all-ones), i.e. matches anything.
    pub fn wildcard(key_size: usize) -> Self {
        Key {
            segments: SmallVec::from_elem(Segment::MAX, key_size),
        }
    }

    /// A key of the given length with every segment zeroed.
    pub fn zero(key_size: usize) -> Self {
        Key {
            segments: SmallVec::from_elem(0, key_size),
        }
    }

    /// Build directly from segment words (used by `VariableList`/tests).
    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Self {
        Key {
            segments: segments.into_iter().collect(),
        }
    }

    /// Number of segments (words) in this key.
    pub fn key_size(&self) -> usize {
        self.segments.len()
    }

    /// Raw segment words.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn check_len(&self, other: &Key) -> Result<(), RaError> {
        if self.segments.len() != other.segments.len() {
            return Err(RaError::InvalidKey(format!(
                "key length mismatch: {} vs {}",
                self.segments.len(),
                other.segments.len()
            )));
        }
        Ok(())
    }

    /// Bitwise OR of two equal-length keys (used to apply a projection
    /// mask: `apply_mask(k, m) = k | m`).
    pub fn or(&self, other: &Key) -> Result<Key, RaError> {
        self.check_len(other)?;
        Ok(Key {
            segments: self
                .segments
                .iter()
                .zip(other.segments.iter())
                .map(|(a, b)| a | b)
                .collect(),
        })
    }

    /// Raw field value of `var` within this key (not checked against
    /// wildcard or cardinality — use [`crate::variable::VariableList`] for
    /// the semantic accessors).
    pub(crate) fn raw_field(&self, segment: usize, shift: u32, field_mask: Segment) -> Segment {
        (self.segments[segment] >> shift) & field_mask
    }

    pub(crate) fn set_raw_field(
        &mut self,
        segment: usize,
        shift: u32,
        field_mask: Segment,
        value: Segment,
    ) {
        let clear_mask = !(field_mask << shift);
        self.segments[segment] = (self.segments[segment] & clear_mask) | ((value & field_mask) << shift);
    }

    /// Fast match: only compares whole segments, treating an entirely
    /// all-ones segment on either side as "matches anything in this
    /// segment". This is coarser than [`crate::variable::VariableList::keys_match`]
    /// whenever a segment packs more than one variable and only some of
    /// them are wildcard — callers needing precise per-variable semantics
    /// must use the `VariableList`-aware matcher.
    pub fn matches_fast(&self, other: &Key) -> Result<bool, RaError> {
        self.check_len(other)?;
        for (a, b) in self.segments.iter().zip(other.segments.iter()) {
            if a == b {
                continue;
            }
            if *a == Segment::MAX || *b == Segment::MAX {
                continue;
            }
            return Ok(false);
        }
        Ok(true)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key(")?;
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{s:08x}")?;
        }
        write!(f, ")")
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.segments.cmp(&other.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_key_is_all_ones() {
        let k = Key::wildcard(2);
        assert_eq!(k.segments(), &[Segment::MAX, Segment::MAX]);
    }

    #[test]
    fn or_combines_segments() {
        let a = Key::from_segments([0b0011, 0b0000]);
        let b = Key::from_segments([0b1100, 0b1111]);
        let c = a.or(&b).unwrap();
        assert_eq!(c.segments(), &[0b1111, 0b1111]);
    }

    #[test]
    fn length_mismatch_is_invalid_key() {
        let a = Key::wildcard(1);
        let b = Key::wildcard(2);
        assert!(matches!(a.or(&b), Err(RaError::InvalidKey(_))));
        assert!(matches!(a.matches_fast(&b), Err(RaError::InvalidKey(_))));
    }

    #[test]
    fn matches_fast_symmetric_and_reflexive() {
        let a = Key::from_segments([0b0101]);
        let wc = Key::wildcard(1);
        assert!(a.matches_fast(&a).unwrap());
        assert!(a.matches_fast(&wc).unwrap());
        assert!(wc.matches_fast(&a).unwrap());
    }

    #[test]
    fn raw_field_round_trips_through_set() {
        let mut k = Key::zero(1);
        let field_mask = 0b111; // 3 bits
        k.set_raw_field(0, 4, field_mask, 5);
        assert_eq!(k.raw_field(0, 4, field_mask), 5);
    }

    #[test]
    fn ordering_is_lexicographic_over_segments() {
        let a = Key::from_segments([1, 5]);
        let b = Key::from_segments([1, 6]);
        let c = Key::from_segments([2, 0]);
        assert!(a < b);
        assert!(b < c);
    }
}
