//! Error kinds surfaced by the collective engine.

use thiserror::Error;

/// Errors produced by the collective engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CollError {
    /// Allocation of a work item, collective state, or address set entry failed.
    #[error("out of memory")]
    OutOfMemory,
    /// A set operation was given an invalid argument (duplicate insert, missing remove, ...).
    #[error("invalid argument")]
    InvalidArg,
    /// The `(op, datatype)` pair has no reduction kernel.
    #[error("reduction operation not supported for this datatype")]
    NotSupported,
    /// The transport refused to accept a submission; the caller should retry on the next tick.
    #[error("transport transiently busy")]
    TransientBusy,
    /// A completion callback's tag matched no outstanding work item.
    #[error("completion tag matched no outstanding work item")]
    ProtocolTagMismatch,
}
