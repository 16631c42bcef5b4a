//! Transport collaborators.
//!
//! The unicast tagged transport, the address vector, the event queue, and the completion queue are
//! all external collaborators the engine assumes exist and drives through the traits below. This
//! module also provides (`loopback`) a small in-process reference implementation used by this
//! crate's own integration tests and as a template for wiring in a real transport.

use crate::error::CollError;
use crate::tag::Tag;
use crate::topology::Rank;

/// An address vector: maps logical group indices to transport addresses, and can answer "what is
/// my own address/rank".
pub trait AddressVector: Send + Sync {
    type Addr: Clone + PartialEq + Send + Sync;

    /// All addresses known to this address vector, in index order.
    fn addresses(&self) -> Vec<Self::Addr>;

    /// This endpoint's own transport address, used to resolve its rank within a derived address
    /// set.
    fn local_address(&self) -> Self::Addr;
}

/// A unicast tagged transport.
///
/// `send`/`recv` are expected to be non-blocking: submission either succeeds (the transfer is now
/// in flight and will later complete via [`crate::endpoint::Endpoint::handle_completion`]) or
/// fails with [`CollError::TransientBusy`], in which case the caller restores the work item for a
/// later retry.
pub trait Transport: Send + Sync {
    type Addr: Clone + PartialEq + Send + Sync;

    /// Submits a tagged send of `len` bytes starting at `buf` to `addr`.
    ///
    /// # Safety
    ///
    /// `buf` must remain valid for `len` bytes until the transport signals completion of `tag`.
    unsafe fn send(&self, addr: &Self::Addr, tag: Tag, buf: *const u8, len: usize) -> Result<(), CollError>;

    /// Submits a tagged receive of `len` bytes into `buf` from `addr`.
    ///
    /// # Safety
    ///
    /// `buf` must remain valid for `len` bytes until the transport signals completion of `tag`.
    unsafe fn recv(&self, addr: &Self::Addr, tag: Tag, buf: *mut u8, len: usize) -> Result<(), CollError>;
}

/// A user-visible event posted by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `FI_JOIN_COMPLETE`: posted when a join finishes.
    JoinComplete { group: crate::group::GroupId, user_context: usize },
}

/// Sink for [`Event`]s (the engine's event queue collaborator).
pub trait EventQueue: Send + Sync {
    fn post(&self, event: Event);
}

/// A completion queue entry posted when a barrier/allreduce/broadcast finishes.
#[derive(Debug, Clone)]
pub struct CollectiveCompletion {
    pub tag: Tag,
    pub user_context: usize,
    /// Opaque scratch data carried by the completion (e.g. a barrier's scratch id buffer).
    pub scratch: Vec<u8>,
}

/// Sink for [`CollectiveCompletion`]s (the engine's completion queue collaborator).
pub trait CompletionQueue: Send + Sync {
    fn post(&self, completion: CollectiveCompletion);
}

/// An in-process reference transport, address vector, event queue, and completion queue, wired
/// together over a shared mailbox table. Not part of the engine's public contract — a stand-in
/// for a real RDMA/socket transport, used by this crate's own tests.
pub mod loopback {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// A rank-indexed loopback address: simply the peer's rank within the shared fabric.
    pub type LoopbackAddr = Rank;

    /// A destination pointer for an as-yet-unsatisfied receive. Only ever touched by the single
    /// thread driving this test fabric; wrapped to cross the `Mutex`'s `Send` bound.
    struct PendingRecv(*mut u8);
    unsafe impl Send for PendingRecv {}

    #[derive(Default)]
    struct Mailbox {
        /// Messages that arrived before the matching recv was posted, in arrival order.
        inbox: VecDeque<(Tag, Vec<u8>)>,
        /// Recvs posted before the matching send arrived.
        pending: VecDeque<(Tag, PendingRecv, usize)>,
        /// Tags satisfied for this rank (its own completed sends, and recvs satisfied either
        /// immediately or by a later send), awaiting `LoopbackTransport::drain_completed`.
        completed: VecDeque<Tag>,
    }

    /// A shared in-process fabric connecting `n` endpoints by rank.
    pub struct Fabric {
        mailboxes: Vec<Mutex<Mailbox>>,
    }

    impl Fabric {
        pub fn new(n: usize) -> Arc<Fabric> {
            Arc::new(Fabric {
                mailboxes: (0..n).map(|_| Mutex::new(Mailbox::default())).collect(),
            })
        }
    }

    /// One endpoint's view of the shared [`Fabric`]. Sends and receives rendezvous synchronously
    /// against the destination rank's mailbox: whichever side arrives second performs the copy
    /// and marks the tag completed for the receiving rank; the sending rank marks its own send
    /// completed as soon as its bytes are copied out, since nothing further needs to happen to
    /// that buffer.
    pub struct LoopbackTransport {
        fabric: Arc<Fabric>,
        my_rank: Rank,
    }

    impl LoopbackTransport {
        pub fn new(fabric: Arc<Fabric>, my_rank: Rank) -> Self {
            LoopbackTransport { fabric, my_rank }
        }

        pub fn rank(&self) -> Rank {
            self.my_rank
        }

        /// Drains and returns every tag completed for this rank since the last call: its own
        /// submitted sends, and its receives satisfied either immediately at post time or by a
        /// send that arrived afterward. The harness feeds each returned tag to
        /// [`crate::endpoint::Endpoint::handle_completion`].
        pub fn drain_completed(&self) -> Vec<Tag> {
            let mut mailbox = self.fabric.mailboxes[self.my_rank as usize].lock().unwrap();
            mailbox.completed.drain(..).collect()
        }
    }

    impl Transport for LoopbackTransport {
        type Addr = LoopbackAddr;

        unsafe fn send(&self, addr: &Self::Addr, tag: Tag, buf: *const u8, len: usize) -> Result<(), CollError> {
            let bytes = std::slice::from_raw_parts(buf, len).to_vec();
            {
                let mut dest = self.fabric.mailboxes[*addr as usize].lock().unwrap();
                if let Some(pos) = dest.pending.iter().position(|(t, _, _)| *t == tag) {
                    let (_, recv, recv_len) = dest.pending.remove(pos).unwrap();
                    assert_eq!(bytes.len(), recv_len, "recv length mismatch");
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), recv.0, recv_len);
                    dest.completed.push_back(tag);
                } else {
                    dest.inbox.push_back((tag, bytes));
                }
            }
            let mut own = self.fabric.mailboxes[self.my_rank as usize].lock().unwrap();
            own.completed.push_back(tag);
            Ok(())
        }

        unsafe fn recv(&self, _addr: &Self::Addr, tag: Tag, buf: *mut u8, len: usize) -> Result<(), CollError> {
            let mut own = self.fabric.mailboxes[self.my_rank as usize].lock().unwrap();
            if let Some(pos) = own.inbox.iter().position(|(t, _)| *t == tag) {
                let (_, bytes) = own.inbox.remove(pos).unwrap();
                assert_eq!(bytes.len(), len, "recv length mismatch");
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, len);
                own.completed.push_back(tag);
            } else {
                own.pending.push_back((tag, PendingRecv(buf), len));
            }
            Ok(())
        }
    }

    /// A trivial address vector over `0..n` ranks.
    pub struct LoopbackAv {
        pub n: usize,
        pub my_rank: Rank,
    }

    impl AddressVector for LoopbackAv {
        type Addr = LoopbackAddr;

        fn addresses(&self) -> Vec<Self::Addr> {
            (0..self.n as Rank).collect()
        }

        fn local_address(&self) -> Self::Addr {
            self.my_rank
        }
    }

    /// An in-memory event queue collecting posted events for inspection by tests.
    #[derive(Default)]
    pub struct RecordingEventQueue {
        pub events: Mutex<Vec<Event>>,
    }

    impl EventQueue for RecordingEventQueue {
        fn post(&self, event: Event) {
            self.events.lock().unwrap().push(event);
        }
    }

    /// An in-memory completion queue collecting posted completions for inspection by tests.
    #[derive(Default)]
    pub struct RecordingCompletionQueue {
        pub completions: Mutex<Vec<CollectiveCompletion>>,
    }

    impl CompletionQueue for RecordingCompletionQueue {
        fn post(&self, completion: CollectiveCompletion) {
            self.completions.lock().unwrap().push(completion);
        }
    }
}
