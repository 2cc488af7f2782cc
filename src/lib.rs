//! # Hammertime
//!
//! Rowhammer fliptable analysis: DRAM address translation, the fliptable data model and
//! exploit success estimation. See [`hammertime_core`] for details.
pub use hammertime_core::*;
