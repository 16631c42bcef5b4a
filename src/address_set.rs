//! Address Set: ordered, deduplicated group membership.

use std::sync::Arc;

use conv::ConvUtil;
use parking_lot::Mutex;

use crate::error::CollError;
use crate::topology::Rank;

/// A stable opaque token referring to a group's collective address — either the implicit "world"
/// group of an address vector, or a group minted by `join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectiveAddress(pub u64);

impl CollectiveAddress {
    /// Sentinel meaning "no collective address supplied"; passed to `join` it means "use the
    /// world group of the address vector".
    pub const NOT_AVAILABLE: CollectiveAddress = CollectiveAddress(u64::MAX);
    /// The implicit world group's token.
    pub const WORLD: CollectiveAddress = CollectiveAddress(0);
}

struct Inner<A> {
    addrs: Vec<A>,
}

/// An ordered, deduplicated set of transport addresses. An address's index within the set is its
/// `Rank`.
///
/// Reference-counted since a live group's address set may be shared with sets still held by the
/// user for further set algebra.
#[derive(Clone)]
pub struct AddressSet<A> {
    inner: Arc<Mutex<Inner<A>>>,
}

impl<A: Clone + PartialEq> AddressSet<A> {
    /// Builds an address set from `count` addresses drawn from `source`, starting at `start` and
    /// advancing by `stride` each time — the shape of `av_set_create`'s `attr`.
    pub fn from_strided(source: &[A], start: usize, count: usize, stride: usize) -> Self {
        let mut addrs = Vec::with_capacity(count);
        for i in 0..count {
            addrs.push(source[start + i * stride.max(1)].clone());
        }
        AddressSet {
            inner: Arc::new(Mutex::new(Inner { addrs })),
        }
    }

    /// Builds an address set directly from an address list (assumed already deduplicated).
    pub fn from_vec(addrs: Vec<A>) -> Self {
        AddressSet {
            inner: Arc::new(Mutex::new(Inner { addrs })),
        }
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.inner.lock().addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The opaque collective-address token referring to the implicit world group of the
    /// underlying address vector this set was built from.
    pub fn collective_address(&self) -> CollectiveAddress {
        CollectiveAddress::WORLD
    }

    /// Address at `rank`, if any.
    pub fn address_at(&self, rank: Rank) -> Option<A> {
        if rank < 0 {
            return None;
        }
        self.inner.lock().addrs.get(rank as usize).cloned()
    }

    /// The rank of `addr` within this set, if it is a member.
    pub fn rank_of(&self, addr: &A) -> Option<Rank> {
        self.inner.lock().addrs.iter().position(|a| a == addr).map(|i| {
            i.value_as().expect("membership count cannot be expressed as a Rank")
        })
    }

    /// Snapshot of the full membership, in rank order.
    pub fn members(&self) -> Vec<A> {
        self.inner.lock().addrs.clone()
    }

    /// `union(self, src)`: append to `self` each address of `src` absent from `self`.
    pub fn union(&self, src: &AddressSet<A>) {
        let src_addrs = src.members();
        let mut inner = self.inner.lock();
        for addr in src_addrs {
            if !inner.addrs.contains(&addr) {
                inner.addrs.push(addr);
            }
        }
    }

    /// `intersect(self, src)`: retain in `self` addresses also present in `src`, order preserved.
    pub fn intersect(&self, src: &AddressSet<A>) {
        let src_addrs = src.members();
        let mut inner = self.inner.lock();
        inner.addrs.retain(|a| src_addrs.contains(a));
    }

    /// `diff(self, src)`: remove from `self` addresses present in `src` via swap-with-tail
    /// deletion (order of the remainder is not preserved as a sequence, but is preserved as a
    /// multiset).
    pub fn diff(&self, src: &AddressSet<A>) {
        let src_addrs = src.members();
        let mut inner = self.inner.lock();
        let mut tail = inner.addrs.len();
        let mut i = 0;
        while i < tail {
            if src_addrs.contains(&inner.addrs[i]) {
                tail -= 1;
                inner.addrs.swap(i, tail);
            } else {
                i += 1;
            }
        }
        inner.addrs.truncate(tail);
    }

    /// `insert(self, addr)`: append; fails with `InvalidArg` if already present.
    pub fn insert(&self, addr: A) -> Result<(), CollError> {
        let mut inner = self.inner.lock();
        if inner.addrs.contains(&addr) {
            return Err(CollError::InvalidArg);
        }
        inner.addrs.push(addr);
        Ok(())
    }

    /// `remove(self, addr)`: swap-with-tail delete; fails `InvalidArg` if absent.
    pub fn remove(&self, addr: &A) -> Result<(), CollError> {
        let mut inner = self.inner.lock();
        let pos = inner
            .addrs
            .iter()
            .position(|a| a == addr)
            .ok_or(CollError::InvalidArg)?;
        let last = inner.addrs.len() - 1;
        inner.addrs.swap(pos, last);
        inner.addrs.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(addrs: &[u32]) -> AddressSet<u32> {
        AddressSet::from_vec(addrs.to_vec())
    }

    #[test]
    fn diff_removes_by_multiset_equality() {
        let a = set(&[1, 2, 3, 4]);
        let b = set(&[2, 3, 5]);
        a.diff(&b);
        let mut remaining = a.members();
        remaining.sort();
        assert_eq!(remaining, vec![1, 4]);
    }

    #[test]
    fn union_appends_new_members() {
        let a = set(&[1, 2, 3, 4]);
        let b = set(&[2, 3, 5]);
        a.union(&b);
        assert_eq!(a.members(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn insert_duplicate_is_invalid_arg() {
        let a = set(&[1, 2]);
        assert_eq!(a.insert(1), Err(CollError::InvalidArg));
    }

    #[test]
    fn remove_missing_is_invalid_arg() {
        let a = set(&[1, 2]);
        assert_eq!(a.remove(&9), Err(CollError::InvalidArg));
    }

    #[test]
    fn insert_then_remove_is_unchanged_as_a_multiset() {
        let a = set(&[1, 2, 3]);
        a.insert(9).unwrap();
        a.remove(&9).unwrap();
        let mut members = a.members();
        members.sort();
        assert_eq!(members, vec![1, 2, 3]);
    }

    #[test]
    fn union_of_diff_and_intersect_reconstructs_the_original() {
        let a = set(&[1, 2, 3, 4]);
        let b = set(&[2, 3, 5]);
        let d = set(&a.members());
        d.diff(&b);
        let i = set(&a.members());
        i.intersect(&b);
        d.union(&i);
        let mut lhs = d.members();
        lhs.sort();
        let mut rhs = a.members();
        rhs.sort();
        assert_eq!(lhs, rhs);
    }
}
