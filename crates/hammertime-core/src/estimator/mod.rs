//! Exploit success estimation.
//!
//! An attack's flips are mapped onto the physical pages they hit ([`map_attack`]). An
//! [`ExploitModel`] decides which of those [`VictimPage`]s an attacker could use, and
//! [`FliptableEstimator`] turns the per-attack outcomes into [`Statistics`]: success
//! proportion, memory needed and expected time to a successful attack.
mod fliptable_estimator;
mod model;
mod victim_page;

pub use self::fliptable_estimator::{FliptableEstimator, Statistics, Summary, compute_attack_time};
pub use self::model::{AnyFlip, BitTarget, ExploitModel};
pub use self::victim_page::{PageBitFlip, VictimPage, map_attack};
