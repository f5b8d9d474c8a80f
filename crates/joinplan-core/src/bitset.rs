//! # Fixed-Width Bitsets
//!
//! Node subsets and predicate sets are packed into a single `u64`. Every memo key,
//! eligibility set, parameter-table set and applied-predicate mask in the planner is
//! one of these words, so all the bit twiddling lives here behind named helpers.
//!
//! ## Pseudo-Table Bits
//!
//! The top bits of a [`NodeMap`] never name a real table:
//!
//! - [`OUTER_REF_TABLE_BIT`]: the value comes from an enclosing query block. It is
//!   constant for the duration of one execution of this block.
//! - [`RAND_TABLE_BIT`]: the value is nondeterministic and must be re-evaluated per row.
//!
//! This is why at most [`MAX_TABLES`] real tables are supported.

/// A set of join-graph nodes.
pub type NodeMap = u64;

/// A set of predicate indexes.
pub type PredicateMap = u64;

pub const MAX_TABLES: usize = 61;
pub const MAX_PREDICATES: usize = 64;

pub const OUTER_REF_TABLE_BIT: NodeMap = 1 << 62;
pub const RAND_TABLE_BIT: NodeMap = 1 << 63;
pub const PSEUDO_TABLE_BITS: NodeMap = OUTER_REF_TABLE_BIT | RAND_TABLE_BIT;

#[inline]
pub fn table_bitmap(idx: usize) -> NodeMap {
    debug_assert!(idx < 64);
    1u64 << idx
}

/// All bits in `[start, end)`.
#[inline]
pub fn tables_between(start: usize, end: usize) -> u64 {
    debug_assert!(start <= end && end <= 64);
    if start == end {
        return 0;
    }
    let upper = if end == 64 { u64::MAX } else { (1u64 << end) - 1 };
    upper & !((1u64 << start) - 1)
}

#[inline]
pub fn is_subset(x: u64, y: u64) -> bool {
    x & y == x
}

#[inline]
pub fn overlaps(x: u64, y: u64) -> bool {
    x & y != 0
}

#[inline]
pub fn is_single_bit_set(x: u64) -> bool {
    x != 0 && x & (x - 1) == 0
}

#[inline]
pub fn isolate_lowest_bit(x: u64) -> u64 {
    x & x.wrapping_neg()
}

#[inline]
pub fn find_lowest_bit_set(x: u64) -> usize {
    debug_assert!(x != 0);
    x.trailing_zeros() as usize
}

#[inline]
pub fn popcount(x: u64) -> usize {
    x.count_ones() as usize
}

/// Iterates over the indexes of the set bits, lowest first.
#[derive(Debug, Clone, Copy)]
pub struct BitsSetIn {
    remaining: u64,
}

impl Iterator for BitsSetIn {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.remaining.trailing_zeros() as usize;
        self.remaining &= self.remaining - 1;
        Some(idx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = popcount(self.remaining);
        (n, Some(n))
    }
}

impl DoubleEndedIterator for BitsSetIn {
    fn next_back(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let idx = 63 - self.remaining.leading_zeros() as usize;
        self.remaining &= !(1u64 << idx);
        Some(idx)
    }
}

impl ExactSizeIterator for BitsSetIn {}

pub fn bits_set_in(x: u64) -> BitsSetIn {
    BitsSetIn { remaining: x }
}

/// Iterates over every non-empty subset of a set, in increasing numeric order.
///
/// Uses the `(sub - set) & set` successor trick, so each step is O(1) and no
/// intermediate collection is built.
#[derive(Debug, Clone, Copy)]
pub struct NonzeroSubsetsOf {
    set: u64,
    next: u64,
}

impl Iterator for NonzeroSubsetsOf {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.next == 0 {
            return None;
        }
        let current = self.next;
        self.next = current.wrapping_sub(self.set) & self.set;
        Some(current)
    }
}

pub fn nonzero_subsets_of(set: u64) -> NonzeroSubsetsOf {
    NonzeroSubsetsOf {
        set,
        next: isolate_lowest_bit(set),
    }
}
