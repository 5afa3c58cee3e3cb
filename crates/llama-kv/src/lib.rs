//! # llama-kv
//!
//! Capacity management for a fixed-size execution window.
//!
//! Supports:
//! - **Chunked feeding**: [`BatchFeeder`] splits a token run into bounded batches with
//!   contiguous positions and a logits request on the globally-last token only
//! - **Rolling window**: [`RollingWindow`] owns the token history and the next write
//!   position, and evicts the oldest history when a request would not fit
//! - **Rebuild**: after eviction the retained tail is replayed into a cleared window,
//!   so history and window never disagree
//! - **Overflow detection**: requests that cannot fit even after eviction are reported,
//!   never truncated silently

mod feed;
mod window;

pub use feed::{BatchFeeder, FeedError, FeedResult, DEFAULT_CHUNK_SIZE};
pub use window::{
    CapacityOutcome, RollingWindow, WindowError, WindowPolicy, WindowResult, KEEP_FRACTION,
    SAFETY_MARGIN,
};
