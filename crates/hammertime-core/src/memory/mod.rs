//! The `memory` module provides DRAM addressing.
//!
//! - `DRAMAddr`: A bank/row/column coordinate inside DRAM.
//! - `MemoryLayout`: The bank hash functions and row/column masks of a memory system,
//!   translating physical addresses to DRAM addresses and back.
mod dram_addr;
mod mem_layout;

pub use self::dram_addr::DRAMAddr;
pub use self::mem_layout::MemoryLayout;
