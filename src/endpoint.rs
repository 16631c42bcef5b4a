//! Endpoint: the public entry point binding a transport, address vector, event queue, and
//! completion queue to a live set of groups.

use std::collections::HashMap;

use conv::ConvUtil;
use parking_lot::Mutex;

use crate::address_set::{AddressSet, CollectiveAddress};
use crate::context_id::ContextIdAllocator;
use crate::datatype::{RawBuffer, ReduceOp};
use crate::dispatch::{drain_ready_completions, handle_completion};
use crate::error::CollError;
use crate::group::{Group, GroupId};
use crate::progress::{process_pending_group, progress_group};
use crate::schedule::{compile_barrier, compile_broadcast, compile_join, compile_public_allreduce};
use crate::tag::Tag;
use crate::topology::Rank;
use crate::transport::{AddressVector, CompletionQueue, EventQueue, Transport};

/// The implicit world group's id; always present once an `Endpoint` is constructed.
pub const WORLD_GROUP: GroupId = 0;

struct EndpointState<A> {
    groups: HashMap<GroupId, Group<A>>,
    cid_alloc: ContextIdAllocator,
    next_group_id: GroupId,
}

/// Binds one transport/address-vector/event-queue/completion-queue quadruple to a live collective
/// engine. All mutable state lives behind a single coarse lock: a collective call, a progress
/// tick, and a completion dispatch are each serialized end to end, never interleaved with one
/// another.
pub struct Endpoint<T: Transport, AV: AddressVector<Addr = T::Addr>, EQ: EventQueue, CQ: CompletionQueue> {
    transport: T,
    av: AV,
    event_queue: EQ,
    completion_queue: CQ,
    state: Mutex<EndpointState<T::Addr>>,
}

impl<T, AV, EQ, CQ> Endpoint<T, AV, EQ, CQ>
where
    T: Transport,
    AV: AddressVector<Addr = T::Addr>,
    EQ: EventQueue,
    CQ: CompletionQueue,
    T::Addr: Clone + PartialEq,
{
    /// Builds an endpoint whose world group spans every address known to `av`, with this
    /// endpoint's own rank resolved from `av.local_address()`.
    pub fn new(transport: T, av: AV, event_queue: EQ, completion_queue: CQ) -> Self {
        let world_set = AddressSet::from_vec(av.addresses());
        let own_rank = world_set.rank_of(&av.local_address());
        let cid_alloc = ContextIdAllocator::new();
        let world_group = Group::new(world_set, own_rank, 0);

        let mut groups = HashMap::new();
        groups.insert(WORLD_GROUP, world_group);

        Endpoint {
            transport,
            av,
            event_queue,
            completion_queue,
            state: Mutex::new(EndpointState {
                groups,
                cid_alloc,
                next_group_id: 1,
            }),
        }
    }

    /// This endpoint's address vector.
    pub fn address_vector(&self) -> &AV {
        &self.av
    }

    /// This endpoint's transport, for harnesses that need to pump a reference transport (e.g.
    /// [`crate::transport::loopback::LoopbackTransport::drain_completed`]) between progress ticks.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// This endpoint's event queue, for inspection by callers that supplied a recording sink.
    pub fn event_queue(&self) -> &EQ {
        &self.event_queue
    }

    /// This endpoint's completion queue, for inspection by callers that supplied a recording
    /// sink.
    pub fn completion_queue(&self) -> &CQ {
        &self.completion_queue
    }

    /// Schedules a barrier over `group`. The caller must subsequently drive [`Self::progress`]
    /// (and feed transport completions to [`Self::handle_completion`]) until the corresponding
    /// [`crate::transport::CollectiveCompletion`] is observed on the completion queue.
    pub fn barrier(&self, group: GroupId, user_context: usize) -> Result<(), CollError> {
        let mut state = self.state.lock();
        let EndpointState { groups, cid_alloc, next_group_id } = &mut *state;
        let g = groups.get_mut(&group).ok_or(CollError::InvalidArg)?;
        compile_barrier(g, user_context)?;
        progress_group(g)?;
        process_pending_group(g, &self.transport)?;
        drain_ready_completions(groups, cid_alloc, next_group_id, &self.event_queue, &self.completion_queue, group)
    }

    /// Schedules an all-reduce of `send_buf` into `recv_buf` over `group`.
    ///
    /// # Safety
    ///
    /// `send_buf` and `recv_buf` must remain valid and exclusively owned by this call until its
    /// completion is observed.
    pub unsafe fn allreduce(
        &self,
        group: GroupId,
        send_buf: RawBuffer,
        recv_buf: RawBuffer,
        op: ReduceOp,
        user_context: usize,
    ) -> Result<(), CollError> {
        let mut state = self.state.lock();
        let EndpointState { groups, cid_alloc, next_group_id } = &mut *state;
        let g = groups.get_mut(&group).ok_or(CollError::InvalidArg)?;
        compile_public_allreduce(g, send_buf, recv_buf, op, user_context)?;
        progress_group(g)?;
        process_pending_group(g, &self.transport)?;
        drain_ready_completions(groups, cid_alloc, next_group_id, &self.event_queue, &self.completion_queue, group)
    }

    /// Schedules a broadcast of `buf` from `root` over `group`.
    ///
    /// # Safety
    ///
    /// `buf` must remain valid and exclusively owned by this call until its completion is
    /// observed.
    pub unsafe fn broadcast(
        &self,
        group: GroupId,
        root: Rank,
        buf: RawBuffer,
        user_context: usize,
    ) -> Result<(), CollError> {
        let mut state = self.state.lock();
        let EndpointState { groups, cid_alloc, next_group_id } = &mut *state;
        let g = groups.get_mut(&group).ok_or(CollError::InvalidArg)?;
        compile_broadcast(g, root, buf, user_context)?;
        progress_group(g)?;
        process_pending_group(g, &self.transport)?;
        drain_ready_completions(groups, cid_alloc, next_group_id, &self.event_queue, &self.completion_queue, group)
    }

    /// Joins a new subgroup drawn from `members` (a subset of addresses known to `parent`,
    /// deduplicated, in the caller-supplied order), against the consensus of every endpoint
    /// participating in `parent`. `collective_addr` selects the parent group;
    /// [`CollectiveAddress::NOT_AVAILABLE`] means "the world group".
    ///
    /// Every endpoint that is a member of `parent` must call `join` for this call to complete —
    /// including endpoints that are not members of `members`, who must still call `join` with a
    /// membership list that excludes themselves so their non-member candidate can participate in
    /// the underlying context-id consensus.
    ///
    /// A non-member still gets back a valid `GroupId`: the new group is installed on every caller
    /// of this `join`, with `own_rank: None` for non-members, so it may still hold a context id
    /// slot and be torn down later even though it never participates in the new group's
    /// reductions.
    pub fn join(
        &self,
        collective_addr: CollectiveAddress,
        members: Vec<T::Addr>,
        user_context: usize,
    ) -> Result<GroupId, CollError> {
        let parent_id = if collective_addr == CollectiveAddress::NOT_AVAILABLE {
            WORLD_GROUP
        } else {
            collective_addr.0
        };

        let mut state = self.state.lock();
        let new_group_id = state.next_group_id;
        state.next_group_id += 1;

        let own_addr = self.av.local_address();
        let new_own_rank = members
            .iter()
            .position(|a| *a == own_addr)
            .map(|i| i.value_as().expect("membership count cannot be expressed as a Rank"));
        let new_address_set = AddressSet::from_vec(members);
        let snapshot = state.cid_alloc.snapshot();

        let EndpointState { groups, cid_alloc, next_group_id } = &mut *state;
        let parent = groups.get_mut(&parent_id).ok_or(CollError::InvalidArg)?;
        compile_join(parent, snapshot, new_group_id, new_address_set, new_own_rank, user_context)?;
        progress_group(parent)?;
        process_pending_group(parent, &self.transport)?;
        drain_ready_completions(groups, cid_alloc, next_group_id, &self.event_queue, &self.completion_queue, parent_id)?;
        Ok(new_group_id)
    }

    /// Runs one progress tick: drains every live group's deferred list up to its next barrier
    /// and submits newly-pending transfers to the transport.
    pub fn progress(&self) -> Result<(), CollError> {
        let mut state = self.state.lock();
        let EndpointState { groups, cid_alloc, next_group_id } = &mut *state;
        let ids: Vec<GroupId> = groups.keys().copied().collect();
        for id in ids {
            if let Some(g) = groups.get_mut(&id) {
                progress_group(g)?;
                process_pending_group(g, &self.transport)?;
            }
            drain_ready_completions(groups, cid_alloc, next_group_id, &self.event_queue, &self.completion_queue, id)?;
        }
        Ok(())
    }

    /// Resubmits every live group's already-pending `Send`/`Recv` items to the transport, without
    /// draining any further deferred work. Callable standalone from a host's progress loop when it
    /// wants to retry outstanding transfers (e.g. after a `TransientBusy` backoff) without
    /// re-running [`Self::progress`]'s deferred-list drain.
    pub fn process_pending(&self) -> Result<(), CollError> {
        let mut state = self.state.lock();
        let EndpointState { groups, cid_alloc, next_group_id } = &mut *state;
        let ids: Vec<GroupId> = groups.keys().copied().collect();
        for id in ids {
            if let Some(g) = groups.get_mut(&id) {
                process_pending_group(g, &self.transport)?;
            }
            drain_ready_completions(groups, cid_alloc, next_group_id, &self.event_queue, &self.completion_queue, id)?;
        }
        Ok(())
    }

    /// Feeds a transport-reported completion of `tag` within `group` to the dispatcher, applying
    /// any side effects it unblocks and re-running progress.
    pub fn handle_completion(&self, group: GroupId, tag: Tag) -> Result<(), CollError> {
        let mut state = self.state.lock();
        let EndpointState {
            groups,
            cid_alloc,
            next_group_id,
        } = &mut *state;
        handle_completion(
            groups,
            cid_alloc,
            next_group_id,
            &self.event_queue,
            &self.completion_queue,
            group,
            tag,
        )
    }

    /// Whether `group` has no outstanding work (useful for tests driving the loopback transport
    /// to quiescence).
    pub fn is_quiescent(&self, group: GroupId) -> bool {
        self.state
            .lock()
            .groups
            .get(&group)
            .map(Group::is_quiescent)
            .unwrap_or(true)
    }

    /// The context id a live `group` was assigned at join, if it currently exists on this
    /// endpoint.
    pub fn context_id(&self, group: GroupId) -> Option<crate::tag::ContextId> {
        self.state.lock().groups.get(&group).map(|g| g.context_id)
    }

    /// This endpoint's own rank within `group`, if it exists and this endpoint is a member.
    pub fn rank_in(&self, group: GroupId) -> Option<Rank> {
        self.state.lock().groups.get(&group).and_then(|g| g.own_rank)
    }

    /// Tears down `group`: releases its context id back to the allocator and drops the group.
    /// A no-op if `group` does not exist (already torn down) or is [`WORLD_GROUP`], which has no
    /// context id to release and lives for the endpoint's whole lifetime.
    pub fn leave(&self, group: GroupId) {
        if group == WORLD_GROUP {
            return;
        }
        let mut state = self.state.lock();
        let EndpointState { groups, cid_alloc, .. } = &mut *state;
        if let Some(g) = groups.remove(&group) {
            cid_alloc.set_bit(g.context_id);
        }
    }
}
