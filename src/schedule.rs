//! Schedule Compiler: translates a collective call into an ordered work-item sequence with
//! barrier markers.

use crate::context_id::{ContextIdAllocator, CID_WORDS};
use crate::datatype::{RawBuffer, ReduceOp};
use crate::error::CollError;
use crate::group::{Group, GroupId};
use crate::tag::Tag;
use crate::topology::Rank;
use crate::work_item::{CompletionKind, CompletionOpItem, CopyOpItem, ReduceOpItem, TransferOp, WorkItem};

fn largest_pow2_leq(n: i32) -> i32 {
    if n <= 0 {
        return 0;
    }
    let mut p = 1;
    while p * 2 <= n {
        p *= 2;
    }
    p
}

/// Compiles a recursive halving/doubling all-reduce over `send_buf`/`recv_buf` into `group`'s
/// deferred list, appending no `Completion` item of its own (callers append the completion shape
/// appropriate to their use of the result). Returns the tag of the last scheduled transfer, for
/// use as the completion queue entry's tag.
///
/// The authoritative reduced result is left in `send_buf` — `recv_buf` is scratch space for the
/// receive half of each exchange. Callers that need the result in `recv_buf` (the public
/// `allreduce` entry point) must append a trailing `Copy` item themselves.
pub(crate) fn compile_allreduce<A: Clone + PartialEq>(
    group: &mut Group<A>,
    send_buf: RawBuffer,
    recv_buf: RawBuffer,
    op: ReduceOp,
) -> Result<Tag, CollError> {
    let my_rank = group.own_rank.ok_or(CollError::InvalidArg)?;
    let n = group.address_set.len() as i32;
    if n <= 0 {
        return Err(CollError::InvalidArg);
    }

    let seq = group.next_seq();
    let addr = |g: &Group<A>, rank: Rank| g.address_set.address_at(rank).ok_or(CollError::InvalidArg);

    let pof2 = largest_pow2_leq(n);
    let rem = n - pof2;

    let mut last_tag = group.form_tag_for(seq, my_rank);
    let mut my_new_id: Option<i32> = None;

    if my_rank < 2 * rem {
        if my_rank % 2 == 0 {
            let dest = addr(group, my_rank + 1)?;
            let tag = group.form_tag_for(seq, my_rank);
            group.deferred.push_back(WorkItem::Send(TransferOp {
                tag,
                peer: dest,
                buf: send_buf,
                is_barrier: true,
            }));
            last_tag = tag;
            my_new_id = None;
        } else {
            let src_rank = my_rank - 1;
            let src = addr(group, src_rank)?;
            let tag = group.form_tag_for(seq, src_rank);
            group.deferred.push_back(WorkItem::Recv(TransferOp {
                tag,
                peer: src,
                buf: recv_buf,
                is_barrier: true,
            }));
            group.deferred.push_back(WorkItem::Reduce(ReduceOpItem {
                in_buf: recv_buf,
                inout_buf: send_buf,
                op,
                is_barrier: true,
            }));
            last_tag = tag;
            my_new_id = Some(my_rank / 2);
        }
    } else {
        my_new_id = Some(my_rank - rem);
    }

    if let Some(my_new_id) = my_new_id {
        let mut mask = 1;
        while mask < pof2 {
            let new_dest = my_new_id ^ mask;
            let dest_rank = if new_dest < rem { new_dest * 2 + 1 } else { new_dest + rem };
            let dest_addr = addr(group, dest_rank)?;

            let recv_tag = group.form_tag_for(seq, dest_rank);
            group.deferred.push_back(WorkItem::Recv(TransferOp {
                tag: recv_tag,
                peer: dest_addr.clone(),
                buf: recv_buf,
                is_barrier: false,
            }));

            let send_tag = group.form_tag_for(seq, my_rank);
            group.deferred.push_back(WorkItem::Send(TransferOp {
                tag: send_tag,
                peer: dest_addr,
                buf: send_buf,
                is_barrier: true,
            }));

            if dest_rank < my_rank {
                group.deferred.push_back(WorkItem::Reduce(ReduceOpItem {
                    in_buf: recv_buf,
                    inout_buf: send_buf,
                    op,
                    is_barrier: true,
                }));
            } else {
                group.deferred.push_back(WorkItem::Reduce(ReduceOpItem {
                    in_buf: send_buf,
                    inout_buf: recv_buf,
                    op,
                    is_barrier: true,
                }));
                group.deferred.push_back(WorkItem::Copy(CopyOpItem {
                    in_buf: recv_buf,
                    out_buf: send_buf,
                    is_barrier: true,
                }));
            }
            last_tag = recv_tag.max(send_tag);
            mask <<= 1;
        }
    }

    if my_rank < 2 * rem {
        if my_rank % 2 == 1 {
            let dest = addr(group, my_rank - 1)?;
            let tag = group.form_tag_for(seq, my_rank);
            group.deferred.push_back(WorkItem::Send(TransferOp {
                tag,
                peer: dest,
                buf: send_buf,
                is_barrier: true,
            }));
            last_tag = tag;
        } else {
            let src_rank = my_rank + 1;
            let src = addr(group, src_rank)?;
            let tag = group.form_tag_for(seq, src_rank);
            group.deferred.push_back(WorkItem::Recv(TransferOp {
                tag,
                peer: src,
                buf: send_buf,
                is_barrier: true,
            }));
            last_tag = tag;
        }
    }

    Ok(last_tag)
}

/// Compiles a barrier: an all-reduce of a single, value-irrelevant 64-bit word over bitwise AND,
/// followed by a `Completion` item that posts a collective completion.
pub(crate) fn compile_barrier<A: Clone + PartialEq>(
    group: &mut Group<A>,
    user_context: usize,
) -> Result<(), CollError> {
    let mut scratch = Box::new(1u64);
    let buf = RawBuffer::from_mut(&mut *scratch);
    let tag = compile_allreduce(group, buf, buf, ReduceOp::BAnd)?;
    group.deferred.push_back(WorkItem::Completion(CompletionOpItem {
        tag,
        kind: CompletionKind::Barrier { scratch, user_context },
    }));
    Ok(())
}

/// Compiles a public, user-facing all-reduce: runs the recursive halving/doubling exchange and
/// copies the authoritative result into the caller's `recv_buf`, then posts a collective
/// completion.
pub(crate) fn compile_public_allreduce<A: Clone + PartialEq>(
    group: &mut Group<A>,
    send_buf: RawBuffer,
    recv_buf: RawBuffer,
    op: ReduceOp,
    user_context: usize,
) -> Result<(), CollError> {
    let tag = compile_allreduce(group, send_buf, recv_buf, op)?;
    group.deferred.push_back(WorkItem::Copy(CopyOpItem {
        in_buf: send_buf,
        out_buf: recv_buf,
        is_barrier: true,
    }));
    group.deferred.push_back(WorkItem::Completion(CompletionOpItem {
        tag,
        kind: CompletionKind::Allreduce { user_context },
    }));
    Ok(())
}

/// Compiles a join: a `Copy` of the endpoint's current context-id bitmap into a candidate buffer
/// (members) or a precomputed non-member candidate (non-members), an AND all-reduce over the
/// candidate against the *parent* group, and a `Completion` item that elects the lowest free bit,
/// installs the new group, and posts `JoinComplete`.
///
/// Non-members of the new group still participate in the all-reduce because join is scheduled
/// against the parent group, not the (possibly not-locally-joined) new group.
pub(crate) fn compile_join<A: Clone + PartialEq>(
    parent: &mut Group<A>,
    endpoint_cid_snapshot: [u64; CID_WORDS],
    new_group_id: GroupId,
    new_address_set: crate::address_set::AddressSet<A>,
    new_own_rank: Option<Rank>,
    user_context: usize,
) -> Result<(), CollError> {
    let initial = if new_own_rank.is_some() {
        endpoint_cid_snapshot
    } else {
        ContextIdAllocator::non_member_candidate()
    };
    let mut cid_buf: Box<[u64; CID_WORDS]> = Box::new(initial);
    let mut tmp_cid_buf: Box<[u64; CID_WORDS]> = Box::new([0; CID_WORDS]);

    let send_buf = RawBuffer::from_mut_slice(&mut cid_buf[..]);
    let recv_buf = RawBuffer::from_mut_slice(&mut tmp_cid_buf[..]);

    let tag = compile_allreduce(parent, send_buf, recv_buf, ReduceOp::BAnd)?;

    parent.deferred.push_back(WorkItem::Completion(CompletionOpItem {
        tag,
        kind: CompletionKind::Join {
            cid_buf,
            _tmp_cid_buf: tmp_cid_buf,
            new_group_id,
            new_address_set,
            new_rank: new_own_rank,
            user_context,
        },
    }));
    Ok(())
}

/// Compiles a broadcast from `root` as a binomial spanning tree: each non-root rank receives once
/// from its tree parent (a barrier item, since it must hold the value before relaying it) and then
/// forwards to its tree children (non-barrier: forwarding does not gate further progress).
pub(crate) fn compile_broadcast<A: Clone + PartialEq>(
    group: &mut Group<A>,
    root: Rank,
    buf: RawBuffer,
    user_context: usize,
) -> Result<(), CollError> {
    let my_rank = group.own_rank.ok_or(CollError::InvalidArg)?;
    let n = group.address_set.len() as i32;
    if n <= 0 {
        return Err(CollError::InvalidArg);
    }
    let seq = group.next_seq();
    let relative_rank = ((my_rank - root) % n + n) % n;
    let addr = |g: &Group<A>, rank: Rank| g.address_set.address_at(rank).ok_or(CollError::InvalidArg);

    let mut last_tag = group.form_tag_for(seq, root);
    let mut mask = 1;
    while mask < n {
        if relative_rank & mask != 0 {
            let src_rel = relative_rank - mask;
            let src_abs = (src_rel + root) % n;
            let src_addr = addr(group, src_abs)?;
            let tag = group.form_tag_for(seq, src_abs);
            group.deferred.push_back(WorkItem::Recv(TransferOp {
                tag,
                peer: src_addr,
                buf,
                is_barrier: true,
            }));
            last_tag = tag;
            break;
        }
        mask <<= 1;
    }
    mask >>= 1;
    while mask > 0 {
        let dst_rel = relative_rank + mask;
        if dst_rel < n {
            let dst_abs = (dst_rel + root) % n;
            let dst_addr = addr(group, dst_abs)?;
            let tag = group.form_tag_for(seq, my_rank);
            group.deferred.push_back(WorkItem::Send(TransferOp {
                tag,
                peer: dst_addr,
                buf,
                is_barrier: false,
            }));
            last_tag = tag;
        }
        mask >>= 1;
    }

    group.deferred.push_back(WorkItem::Completion(CompletionOpItem {
        tag: last_tag,
        kind: CompletionKind::Broadcast { user_context },
    }));
    Ok(())
}
