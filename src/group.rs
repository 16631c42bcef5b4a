//! Group Handle: per-group state shared by every collective call targeting that group.

use std::collections::{HashSet, VecDeque};

use crate::address_set::AddressSet;
use crate::tag::{form_tag, ContextId, Sequence, Tag};
use crate::topology::Rank;
use crate::work_item::{CompletionOpItem, WorkItem};

/// Identifies a live group within an `Endpoint`.
pub type GroupId = u64;

pub(crate) struct Group<A> {
    pub address_set: AddressSet<A>,
    pub own_rank: Option<Rank>,
    pub context_id: ContextId,
    pub seq: Sequence,
    pub deferred: VecDeque<WorkItem<A>>,
    /// Only `Send`/`Recv` variants of `WorkItem` ever live here.
    pub pending_transfer: VecDeque<WorkItem<A>>,
    /// Outstanding transfer tags: a transfer is present here iff it is present in
    /// `pending_transfer` or has already been submitted to the transport and is awaiting
    /// completion.
    pub barrier: HashSet<Tag>,
    /// `Completion` items the progress engine has reached in the deferred list (meaning every
    /// transfer they causally depend on has already retired, since `barrier` being empty is what
    /// let the drain reach them) but that `dispatch` has not yet applied. Kept separate from
    /// `pending_transfer`/`barrier` because a `Completion`'s `tag` is typically borrowed from the
    /// last transfer it depended on rather than fresh, so it must never be treated as its own
    /// outstanding transfer.
    pub ready_completions: VecDeque<CompletionOpItem<A>>,
}

impl<A: Clone + PartialEq> Group<A> {
    pub fn new(address_set: AddressSet<A>, own_rank: Option<Rank>, context_id: ContextId) -> Self {
        Group {
            address_set,
            own_rank,
            context_id,
            seq: 0,
            deferred: VecDeque::new(),
            pending_transfer: VecDeque::new(),
            barrier: HashSet::new(),
            ready_completions: VecDeque::new(),
        }
    }

    /// Allocates the next per-group sequence number, consumed once per top-level collective call
    /// (every transfer within that call shares the same `(context_id, seq)` pair and is
    /// disambiguated solely by sender rank).
    pub fn next_seq(&mut self) -> Sequence {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    pub fn form_tag_for(&self, seq: Sequence, sender_rank: Rank) -> Tag {
        form_tag(self.context_id, seq, sender_rank)
    }

    pub fn is_quiescent(&self) -> bool {
        self.deferred.is_empty()
            && self.pending_transfer.is_empty()
            && self.barrier.is_empty()
            && self.ready_completions.is_empty()
    }
}
