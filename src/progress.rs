//! Progress Engine: cooperative, single-tick-to-quiescence draining of a group's deferred and
//! pending-transfer lists.

use crate::datatype::{copy, reduce};
use crate::error::CollError;
use crate::group::Group;
use crate::transport::Transport;
use crate::work_item::WorkItem;

/// Drains `group`'s deferred list, applying `Reduce`/`Copy` items immediately and handing
/// `Send`/`Recv` items to `pending_transfer` for submission, until either the deferred list is
/// empty or a barrier item is reached (the deferred list never runs ahead of an outstanding
/// barrier).
///
/// A `Completion` item is never itself an outstanding transfer: by the time the drain reaches one,
/// `group.barrier` is necessarily empty (the loop's own guard), so every transfer it causally
/// depends on has already retired. It is moved straight to `group.ready_completions` for
/// `dispatch` to apply, rather than through `pending_transfer`/`barrier` — its `tag` is typically
/// borrowed from the last transfer it depended on, and re-tracking that tag as if it were a fresh
/// outstanding transfer would leave it permanently unretired.
pub(crate) fn progress_group<A: Clone + PartialEq>(group: &mut Group<A>) -> Result<(), CollError> {
    loop {
        if !group.barrier.is_empty() {
            return Ok(());
        }
        let Some(item) = group.deferred.pop_front() else {
            return Ok(());
        };
        let stop_after = item.is_barrier();
        match item {
            WorkItem::Reduce(r) => unsafe {
                reduce(r.op, &r.in_buf, &r.inout_buf)?;
            },
            WorkItem::Copy(c) => unsafe {
                copy(&c.in_buf, &c.out_buf);
            },
            WorkItem::Send(t) => {
                group.barrier.insert(t.tag);
                group.pending_transfer.push_back(WorkItem::Send(t));
            }
            WorkItem::Recv(t) => {
                group.barrier.insert(t.tag);
                group.pending_transfer.push_back(WorkItem::Recv(t));
            }
            WorkItem::Completion(c) => {
                group.ready_completions.push_back(c);
            }
        }
        if stop_after {
            return Ok(());
        }
    }
}

/// Submits every `Send`/`Recv` sitting in `group`'s pending-transfer list to `transport`. A
/// submission that fails with [`CollError::TransientBusy`] is restored to the head of the list
/// (both send and recv paths restore symmetrically — see Open Questions in DESIGN.md) and halts
/// further submission this tick, since transports process work roughly in submission order and a
/// later item is unlikely to succeed where an earlier one didn't.
pub(crate) fn process_pending_group<A: Clone + PartialEq, T: Transport<Addr = A>>(
    group: &mut Group<A>,
    transport: &T,
) -> Result<(), CollError> {
    while let Some(item) = group.pending_transfer.pop_front() {
        match item {
            WorkItem::Send(t) => unsafe {
                match transport.send(&t.peer, t.tag, t.buf.as_ptr() as *const u8, t.buf.byte_len()) {
                    Ok(()) => {}
                    Err(CollError::TransientBusy) => {
                        group.pending_transfer.push_front(WorkItem::Send(t));
                        break;
                    }
                    Err(e) => return Err(e),
                }
            },
            WorkItem::Recv(t) => unsafe {
                match transport.recv(&t.peer, t.tag, t.buf.as_mut_ptr() as *mut u8, t.buf.byte_len()) {
                    Ok(()) => {}
                    Err(CollError::TransientBusy) => {
                        group.pending_transfer.push_front(WorkItem::Recv(t));
                        break;
                    }
                    Err(e) => return Err(e),
                }
            },
            WorkItem::Reduce(_) | WorkItem::Copy(_) | WorkItem::Completion(_) => {
                unreachable!("only Send/Recv items are ever pushed to pending_transfer")
            }
        }
    }
    Ok(())
}
