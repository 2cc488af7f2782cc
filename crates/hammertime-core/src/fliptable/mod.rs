//! Fliptables: the observed results of Rowhammer profiling.
//!
//! A fliptable report is line-oriented. Each line names the hammered target rows and the
//! corruptions found afterwards:
//!
//! ```text
//! r100.bk2/r102.bk2 : f0,0f,r101.bk2.col8 ff,fe,r103.bk2
//! ```
//!
//! Consecutive lines with the same targets belong to one [`Attack`]. Every corruption
//! (`<exp>,<got>,<addr>`) is split into single-bit [`Flip`]s. Encoded output renders
//! addresses as `b<bank>.r<row>.c<col>` and lists corruptions against all-ones and
//! all-zeros backgrounds.
mod attack;
mod flip;
mod table;

pub use self::attack::{Attack, Diff, ENCODE_PATTERNS, PhysAttack};
pub use self::flip::{Corruption, Flip, PhysFlip};
pub use self::table::{DecodeLines, Fliptable, Parameters, decode_lines};
