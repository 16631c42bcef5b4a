//! Completion Dispatcher: retires a tagged transfer against a group's barrier set and applies
//! every `Completion` item the progress engine has since made ready.

use std::collections::HashMap;

use crate::address_set::AddressSet;
use crate::context_id::ContextIdAllocator;
use crate::error::CollError;
use crate::group::{Group, GroupId};
use crate::progress::progress_group;
use crate::tag::Tag;
use crate::transport::{CollectiveCompletion, CompletionQueue, Event, EventQueue};
use crate::work_item::CompletionKind;

/// Removes `tag` from `group.barrier`. Returns `false` (a no-op, logged) if `tag` was not
/// outstanding — a completion can arrive for a tag the engine no longer tracks only if the
/// transport redelivers it, which this engine treats as harmless.
fn retire_tag<A>(group: &mut Group<A>, tag: Tag) -> bool {
    if group.barrier.remove(&tag) {
        true
    } else {
        tracing::warn!(tag, "completion for untracked tag; ignoring");
        false
    }
}

/// Runs `group` forward, applying every `Completion` item the progress engine makes ready, until
/// neither progressing nor applying produces further change.
pub(crate) fn drain_ready_completions<A: Clone + PartialEq>(
    groups: &mut HashMap<GroupId, Group<A>>,
    cid_alloc: &mut ContextIdAllocator,
    next_group_id: &mut GroupId,
    event_queue: &dyn EventQueue,
    completion_queue: &dyn CompletionQueue,
    group_id: GroupId,
) -> Result<(), CollError> {
    loop {
        let Some(group) = groups.get_mut(&group_id) else {
            return Ok(());
        };
        progress_group(group)?;

        let Some(group) = groups.get_mut(&group_id) else {
            return Ok(());
        };
        let Some(completion) = group.ready_completions.pop_front() else {
            return Ok(());
        };
        apply_completion(
            groups,
            cid_alloc,
            next_group_id,
            event_queue,
            completion_queue,
            group_id,
            completion,
        )?;
    }
}

/// Handles a transport-reported completion of `tag` within `group_id`: retires the tag, then
/// drains ready `Completion` items (a completion may unblock the next barrier-gated segment of
/// the deferred list, surfacing more).
pub(crate) fn handle_completion<A: Clone + PartialEq>(
    groups: &mut HashMap<GroupId, Group<A>>,
    cid_alloc: &mut ContextIdAllocator,
    next_group_id: &mut GroupId,
    event_queue: &dyn EventQueue,
    completion_queue: &dyn CompletionQueue,
    group_id: GroupId,
    tag: Tag,
) -> Result<(), CollError> {
    let Some(group) = groups.get_mut(&group_id) else {
        return Err(CollError::ProtocolTagMismatch);
    };
    if !retire_tag(group, tag) {
        return Ok(());
    }
    drain_ready_completions(groups, cid_alloc, next_group_id, event_queue, completion_queue, group_id)
}

/// Applies one `Completion` item's side effects: posts an event or a collective completion, and
/// for `Join`, elects the new context id and installs the new group.
fn apply_completion<A: Clone + PartialEq>(
    groups: &mut HashMap<GroupId, Group<A>>,
    cid_alloc: &mut ContextIdAllocator,
    next_group_id: &mut GroupId,
    event_queue: &dyn EventQueue,
    completion_queue: &dyn CompletionQueue,
    parent_group_id: GroupId,
    completion: crate::work_item::CompletionOpItem<A>,
) -> Result<(), CollError> {
    match completion.kind {
        CompletionKind::Barrier { user_context, .. } => {
            completion_queue.post(CollectiveCompletion {
                tag: completion.tag,
                user_context,
                scratch: Vec::new(),
            });
        }
        CompletionKind::Allreduce { user_context } => {
            completion_queue.post(CollectiveCompletion {
                tag: completion.tag,
                user_context,
                scratch: Vec::new(),
            });
        }
        CompletionKind::Broadcast { user_context } => {
            completion_queue.post(CollectiveCompletion {
                tag: completion.tag,
                user_context,
                scratch: Vec::new(),
            });
        }
        CompletionKind::Join {
            cid_buf,
            new_group_id,
            new_address_set,
            new_rank,
            user_context,
            ..
        } => {
            apply_join_completion(
                groups,
                cid_alloc,
                next_group_id,
                event_queue,
                parent_group_id,
                &cid_buf,
                new_group_id,
                new_address_set,
                new_rank,
                user_context,
            )?;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_join_completion<A: Clone + PartialEq>(
    groups: &mut HashMap<GroupId, Group<A>>,
    cid_alloc: &mut ContextIdAllocator,
    next_group_id: &mut GroupId,
    event_queue: &dyn EventQueue,
    parent_group_id: GroupId,
    cid_buf: &[u64; crate::context_id::CID_WORDS],
    new_group_id: GroupId,
    new_address_set: AddressSet<A>,
    new_rank: Option<crate::topology::Rank>,
    user_context: usize,
) -> Result<(), CollError> {
    let elected = ContextIdAllocator::lowest_set_bit(cid_buf).ok_or(CollError::OutOfMemory)?;
    cid_alloc.clear_bit(elected);

    let group = Group::new(new_address_set, new_rank, elected);
    groups.insert(new_group_id, group);

    let _ = (parent_group_id, next_group_id);
    event_queue.post(Event::JoinComplete {
        group: new_group_id,
        user_context,
    });
    Ok(())
}
