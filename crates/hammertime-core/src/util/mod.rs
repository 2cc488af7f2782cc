//! Utility functions and types used throughout hammertime.
//!
//! This module provides:
//! - Bit primitives used by the address translation ([`parity`], [`trailing_zero_count`])
//! - Constants for pages, layouts and attack timing ([`PAGE_SIZE`], [`HASH_FN_CNT`], etc.)
//! - Progress reporting utilities ([`NamedProgress`])

mod bits;
mod constants;
mod named_progress;

pub use self::bits::*;
pub use self::constants::*;
pub use self::named_progress::NamedProgress;
