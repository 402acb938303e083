//! Run identity types shared across the drover crates.
//!
//! RunId identifies one conversational run; Seq is the monotonically
//! increasing event sequence number per run. A turn is identified by the
//! seq of its triggering `user.message` event, so turn identifiers are
//! plain Seq values.

/// Identifies a long-running conversational run.
pub type RunId = String;

/// Monotonically increasing event sequence number per run.
pub type Seq = u64;
