//! A collective-communication engine layered over a tagged point-to-point transport.
//!
//! This crate turns a handful of group-communication primitives — join, barrier, all-reduce, and
//! broadcast — into schedules of ordinary tagged sends, receives, local reductions, and copies,
//! driven to completion by a cooperative, single-threaded progress engine. It does not provide a
//! transport of its own: callers implement [`transport::Transport`] and
//! [`transport::AddressVector`] over whatever unicast, tagged wire protocol they already have (an
//! RDMA fabric, a socket library, an in-process channel), and drive [`endpoint::Endpoint::progress`]
//! and [`endpoint::Endpoint::handle_completion`] from their own event loop.
//!
//! ```no_run
//! use coll_engine::endpoint::Endpoint;
//! use coll_engine::transport::loopback::{Fabric, LoopbackAv, LoopbackTransport, RecordingCompletionQueue, RecordingEventQueue};
//!
//! let fabric = Fabric::new(4);
//! let endpoints: Vec<_> = (0..4)
//!     .map(|rank| {
//!         Endpoint::new(
//!             LoopbackTransport::new(fabric.clone(), rank),
//!             LoopbackAv { n: 4, my_rank: rank },
//!             RecordingEventQueue::default(),
//!             RecordingCompletionQueue::default(),
//!         )
//!     })
//!     .collect();
//! ```

pub mod address_set;
pub mod context_id;
pub mod datatype;
pub(crate) mod dispatch;
pub mod endpoint;
pub mod error;
pub mod group;
pub(crate) mod progress;
pub(crate) mod schedule;
pub mod tag;
pub mod topology;
pub mod transport;
pub(crate) mod work_item;

pub use error::CollError;
