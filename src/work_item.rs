//! Work Queue & Item Taxonomy: the discriminated work items threaded through a group's deferred,
//! pending-transfer, and barrier lists.

use crate::address_set::AddressSet;
use crate::context_id::CID_WORDS;
use crate::datatype::{RawBuffer, ReduceOp};
use crate::group::GroupId;
use crate::tag::Tag;
use crate::topology::Rank;

/// A scheduled tagged transfer (`Send` or `Recv`).
pub(crate) struct TransferOp<A> {
    pub tag: Tag,
    pub peer: A,
    pub buf: RawBuffer,
    pub is_barrier: bool,
}

/// `inout_buf <- op(inout_buf, in_buf)`, element-wise.
pub(crate) struct ReduceOpItem {
    pub in_buf: RawBuffer,
    pub inout_buf: RawBuffer,
    pub op: ReduceOp,
    pub is_barrier: bool,
}

/// `out_buf <- in_buf` (memcpy equivalent).
pub(crate) struct CopyOpItem {
    pub in_buf: RawBuffer,
    pub out_buf: RawBuffer,
    pub is_barrier: bool,
}

/// What a `Completion` work item finishes, and the data it needs to finish it. Since this engine
/// only has a handful of fixed completion shapes, an enum dispatched in
/// `dispatch::apply_completion` stands in for a function-pointer-plus-context callback.
pub(crate) enum CompletionKind<A> {
    /// Finishes a `join`: scan the reduced candidate buffer for its lowest set bit, claim that
    /// context id, install the new group, and post `JoinComplete`.
    Join {
        /// The member's AND-reduced candidate buffer (authoritative result of the allreduce,
        /// which for this engine's recursive halving/doubling always lands back in the buffer
        /// that was passed as `send_buf`).
        cid_buf: Box<[u64; CID_WORDS]>,
        /// Kept alive only so raw pointers taken into it by earlier work items in this schedule
        /// remain valid until this item runs; its contents are not otherwise read.
        _tmp_cid_buf: Box<[u64; CID_WORDS]>,
        new_group_id: GroupId,
        new_address_set: AddressSet<A>,
        new_rank: Option<Rank>,
        user_context: usize,
    },
    /// Finishes a `barrier`: post a `Collective` completion. The scratch word's value is
    /// irrelevant; only the data dependency it created matters.
    Barrier {
        scratch: Box<u64>,
        user_context: usize,
    },
    /// Finishes a user-facing `allreduce`: post a `Collective` completion.
    Allreduce { user_context: usize },
    /// Finishes a `broadcast`: post a `Collective` completion.
    Broadcast { user_context: usize },
}

pub(crate) struct CompletionOpItem<A> {
    pub tag: Tag,
    pub kind: CompletionKind<A>,
}

/// A single work item in a group's schedule.
pub(crate) enum WorkItem<A> {
    Send(TransferOp<A>),
    Recv(TransferOp<A>),
    Reduce(ReduceOpItem),
    Copy(CopyOpItem),
    Completion(CompletionOpItem<A>),
}

impl<A> WorkItem<A> {
    /// Whether the progress engine must stop draining the deferred list after processing this
    /// item.
    pub fn is_barrier(&self) -> bool {
        match self {
            WorkItem::Send(t) | WorkItem::Recv(t) => t.is_barrier,
            WorkItem::Reduce(r) => r.is_barrier,
            WorkItem::Copy(c) => c.is_barrier,
            WorkItem::Completion(_) => false,
        }
    }
}
