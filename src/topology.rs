//! Group membership primitives.
//!
//! A `Rank` is a member's ordinal position within its address set — purely local bookkeeping,
//! with no relation to any underlying transport address.

/// A rank: an endpoint's ordinal position within an `AddressSet`.
pub type Rank = i32;

/// Sentinel meaning "no rank": the local endpoint does not hold a rank in the address set under
/// discussion (it withdrew during a low-pair reduction, or it simply isn't a member).
pub const NO_RANK: Rank = -1;
