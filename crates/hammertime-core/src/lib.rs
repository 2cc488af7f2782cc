//! # Hammertime Core
//!
//! `hammertime-core` analyzes the results of Rowhammer profiling runs. It takes the bit
//! flips a profiler observed in DRAM, maps them back into physical memory and estimates how
//! likely (and how fast) an attacker can turn those flips into a working exploit.
//!
//! ## Architecture Overview
//!
//! The crate is organized bottom-up:
//!
//! - [`util`] - Bit primitives ([`util::parity`], [`util::trailing_zero_count`]), constants
//!   and progress bar styling.
//!
//! - [`memory`] - [`memory::DRAMAddr`] (bank/row/column coordinates) and
//!   [`memory::MemoryLayout`], which translates physical addresses to DRAM addresses and back
//!   using XOR bank hash functions.
//!
//! - [`fliptable`] - The flip data model: [`fliptable::Flip`], [`fliptable::Corruption`],
//!   [`fliptable::Attack`] and [`fliptable::Fliptable`], including the report text format and
//!   the diff/merge algebra.
//!
//! - [`estimator`] - Maps attacks into physical victim pages, judges them with a pluggable
//!   [`estimator::ExploitModel`] and aggregates success statistics in
//!   [`estimator::FliptableEstimator`].
//!
//! ## Example
//!
//! ```
//! use hammertime_core::estimator::{AnyFlip, FliptableEstimator};
//! use hammertime_core::fliptable::Fliptable;
//! use hammertime_core::memory::MemoryLayout;
//!
//! let table: Fliptable = "r100.bk2 : f0,0f,r101.bk2".parse().unwrap();
//! let mut estimator = FliptableEstimator::new(table, MemoryLayout::default(), 2e6).unwrap();
//! estimator.run_exploit(&AnyFlip);
//! let stats = estimator.statistics().unwrap();
//! assert_eq!(stats.summary.successful_attacks, 1);
//! ```

#![warn(missing_docs)]

mod error;
pub mod estimator;
pub mod fliptable;
pub mod memory;
pub mod util;

pub use crate::error::{Error, Result};
