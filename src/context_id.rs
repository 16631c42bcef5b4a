//! Context-ID Allocator: elects a group-unique short id via a distributed bit-AND reduction over
//! a bitmap of locally-free ids.

use crate::tag::ContextId;

/// Width of the bitmap in 64-bit words (256 bits total).
pub const CID_WORDS: usize = 4;
pub const CID_BITS: usize = CID_WORDS * 64;

/// A process- (here: endpoint-) local bitmap of free context ids.
///
/// Externalized as an explicit value owned by an `Endpoint` rather than a process-wide `static`
/// (see Open Questions in DESIGN.md) — this is what makes the allocator unit-testable in
/// isolation and safe to run multiple independent endpoints in one process.
#[derive(Clone)]
pub struct ContextIdAllocator {
    words: [u64; CID_WORDS],
}

impl ContextIdAllocator {
    /// A fresh allocator: all bits set (free) except bit 0, reserved for the implicit world
    /// group.
    pub fn new() -> Self {
        let mut words = [u64::MAX; CID_WORDS];
        words[0] &= !0x1;
        ContextIdAllocator { words }
    }

    /// The current global bitmap, to be copied into a joining member's candidate buffer.
    pub fn snapshot(&self) -> [u64; CID_WORDS] {
        self.words
    }

    /// The candidate buffer a non-member of the joining group contributes: all-ones with bit 0
    /// cleared, so it never constrains the AND-reduction below what's actually free elsewhere.
    pub fn non_member_candidate() -> [u64; CID_WORDS] {
        let mut words = [u64::MAX; CID_WORDS];
        words[0] &= !0x1;
        words
    }

    /// Finds the lowest set bit across `words`, interpreting word 0's bit 0 as global bit index 0,
    /// word 0's bit 63 as index 63, word 1's bit 0 as index 64, and so on.
    pub fn lowest_set_bit(words: &[u64; CID_WORDS]) -> Option<ContextId> {
        for (word_idx, word) in words.iter().enumerate() {
            if *word != 0 {
                let bit = word.trailing_zeros() as usize;
                return Some((word_idx * 64 + bit) as ContextId);
            }
        }
        None
    }

    /// Clears `id` in the global bitmap: the id is now held by a live group.
    pub fn clear_bit(&mut self, id: ContextId) {
        let id = id as usize;
        self.words[id / 64] &= !(1u64 << (id % 64));
    }

    /// Sets `id` in the global bitmap: a group holding `id` has torn down.
    pub fn set_bit(&mut self, id: ContextId) {
        let id = id as usize;
        self.words[id / 64] |= 1u64 << (id % 64);
    }
}

impl Default for ContextIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_allocator_reserves_bit_zero() {
        let alloc = ContextIdAllocator::new();
        let snap = alloc.snapshot();
        assert_eq!(snap[0] & 0x1, 0);
        assert_eq!(snap[0] & 0x2, 0x2);
    }

    #[test]
    fn join_on_four_ranks_with_empty_bitmap_elects_id_one() {
        // All four ranks' candidate buffers AND-reduce to the same value (all are members, so
        // every candidate equals the fresh snapshot); the lowest set bit is 1.
        let alloc = ContextIdAllocator::new();
        let candidates = [alloc.snapshot(); 4];
        let mut reduced = candidates[0];
        for c in &candidates[1..] {
            for i in 0..CID_WORDS {
                reduced[i] &= c[i];
            }
        }
        assert_eq!(ContextIdAllocator::lowest_set_bit(&reduced), Some(1));
    }

    #[test]
    fn clearing_then_reducing_again_skips_the_held_id() {
        let mut alloc = ContextIdAllocator::new();
        alloc.clear_bit(1);
        let reduced = alloc.snapshot();
        assert_eq!(ContextIdAllocator::lowest_set_bit(&reduced), Some(2));
    }

    #[test]
    fn set_bit_frees_a_released_id() {
        let mut alloc = ContextIdAllocator::new();
        alloc.clear_bit(1);
        alloc.set_bit(1);
        let reduced = alloc.snapshot();
        assert_eq!(ContextIdAllocator::lowest_set_bit(&reduced), Some(1));
    }
}
