use itertools::Itertools;
use log::{trace, warn};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::fliptable::{Corruption, Flip, PhysFlip};
use crate::memory::{DRAMAddr, MemoryLayout};
use crate::{Error, Result};

/// Background patterns a report is encoded against: all ones, then all zeros.
pub const ENCODE_PATTERNS: [u8; 2] = [0xff, 0x00];

/// Three-way split of two collections: entries only in the left one, entries in both,
/// entries only in the right one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T> {
    /// Only in `self`
    pub self_only: T,
    /// In both
    pub common: T,
    /// Only in `other`
    pub other_only: T,
}

/// One Rowhammer attack: the hammered target rows and the flips they caused.
///
/// Targets keep their decoded order and are compared as a sequence. Attacks are values;
/// [`Attack::diff`] and [`Attack::merge`] return new attacks.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Attack {
    /// Hammered addresses
    pub targets: Vec<DRAMAddr>,
    /// Observed flips
    pub flips: BTreeSet<Flip>,
}

/// An attack with target and victim addresses translated to physical memory.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PhysAttack {
    /// Physical target addresses
    pub targets: Vec<u64>,
    /// Flips ordered by physical address
    pub flips: BTreeSet<PhysFlip>,
}

impl Attack {
    /// Creates a new attack.
    pub fn new(targets: Vec<DRAMAddr>, flips: BTreeSet<Flip>) -> Self {
        Attack { targets, flips }
    }

    /// Returns true if both attacks hammer the same target sequence.
    pub fn same_targets(&self, other: &Attack) -> bool {
        self.targets == other.targets
    }

    /// Orders attacks by their target sequence, lexicographically by packed address.
    pub fn cmp_targets(&self, other: &Attack) -> Ordering {
        self.targets.cmp(&other.targets)
    }

    fn check_targets(&self, other: &Attack) -> Result<()> {
        if !self.same_targets(other) {
            return Err(Error::TargetMismatch {
                left: self.targets.clone(),
                right: other.targets.clone(),
            });
        }
        Ok(())
    }

    /// Splits the flips of two attacks on the same targets into flips only in `self`,
    /// common flips and flips only in `other`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetMismatch`] if the target sequences differ.
    pub fn diff(&self, other: &Attack) -> Result<Diff<Attack>> {
        self.check_targets(other)?;
        let with_flips = |flips: BTreeSet<Flip>| Attack::new(self.targets.clone(), flips);
        Ok(Diff {
            self_only: with_flips(&self.flips - &other.flips),
            common: with_flips(&self.flips & &other.flips),
            other_only: with_flips(&other.flips - &self.flips),
        })
    }

    /// Unites the flips of two attacks on the same targets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetMismatch`] if the target sequences differ.
    pub fn merge(&self, other: &Attack) -> Result<Attack> {
        self.check_targets(other)?;
        Ok(Attack::new(
            self.targets.clone(),
            &self.flips | &other.flips,
        ))
    }

    /// Returns the per-flip corruptions in flip order, assuming `baseline` as the byte that
    /// was written (see [`Flip::to_corruption`]).
    pub fn corruptions(&self, baseline: Option<u8>) -> impl Iterator<Item = Corruption> + '_ {
        self.flips.iter().map(move |f| f.to_corruption(baseline))
    }

    /// Returns the attack with all addresses reverse-translated to physical memory.
    pub fn to_physmem(&self, layout: &MemoryLayout) -> PhysAttack {
        PhysAttack {
            targets: self.targets.iter().map(|t| layout.dram_to_phys(t)).collect(),
            flips: self.flips.iter().map(|f| f.to_physmem(layout)).collect(),
        }
    }

    /// Decodes one report line `<target>/<target>/... : <exp>,<got>,<addr> ...`.
    ///
    /// Parse errors carry no line number; [`super::decode_lines`] attaches it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] on a missing separator or a malformed target or flip group.
    pub fn decode_line(line: &str) -> Result<Attack> {
        let mut sections = line.split(':');
        let (Some(targ), Some(vict)) = (sections.next(), sections.next()) else {
            return Err(Error::parse(0, line, "missing ':' between targets and victims"));
        };
        let targets = targ
            .split('/')
            .map(|t| t.trim().parse::<DRAMAddr>())
            .collect::<Result<Vec<_>>>()?;

        let mut flips = BTreeSet::new();
        for group in vict.split_whitespace() {
            let corruption: Corruption = group.parse()?;
            if !near_target(&targets, &corruption.addr) {
                warn!(
                    "Found flip far away from target rows: {} (targets {})",
                    corruption.addr,
                    targets.iter().join(" / ")
                );
            }
            trace!("decoded corruption {}", corruption);
            flips.extend(corruption.to_flips());
        }
        Ok(Attack { targets, flips })
    }

    /// Encodes the attack as one report line per background pattern.
    ///
    /// Each line lists the corruptions the flips cause on that background, skipping flips
    /// that are invisible on it (e.g. a pull-up on an all-ones background).
    pub fn encode_with(&self, patterns: &[u8]) -> String {
        let targets = self.targets.iter().join(" / ");
        patterns
            .iter()
            .map(|&pattern| {
                let corruptions = self
                    .corruptions(Some(pattern))
                    .filter(|c| c.got != c.exp)
                    .join(" ");
                format!("{} : {}", targets, corruptions)
            })
            .join("\n")
    }

    /// Encodes the attack against the [`ENCODE_PATTERNS`] backgrounds.
    pub fn encode(&self) -> String {
        self.encode_with(&ENCODE_PATTERNS)
    }

    /// Unites `other` into `self` without checking targets.
    pub(crate) fn absorb(mut self, other: Attack) -> Attack {
        self.flips.extend(other.flips);
        self
    }
}

/// Returns true if `victim` is in a row next to any target row. Banks are not compared.
fn near_target(targets: &[DRAMAddr], victim: &DRAMAddr) -> bool {
    targets.iter().any(|t| t.row.abs_diff(victim.row) == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip(row: u64, bit: u8, pullup: bool) -> Flip {
        Flip::new(DRAMAddr::new(1, row, 0), bit, pullup)
    }

    fn attack(targets: &[u64], flips: &[Flip]) -> Attack {
        Attack::new(
            targets.iter().map(|&r| DRAMAddr::new(1, r, 0)).collect(),
            flips.iter().copied().collect(),
        )
    }

    #[test]
    fn test_decode_line() {
        let atk = Attack::decode_line("r100.bk2 : f0,0f,r100.bk2").unwrap();
        assert_eq!(atk.targets, vec![DRAMAddr::new(2, 100, 0)]);
        assert_eq!(atk.flips.len(), 8);
    }

    #[test]
    fn test_decode_line_multiple_targets() {
        let atk = Attack::decode_line(
            "r100.bk2/r102.bk2 : ff,fe,r101.bk2.col8 00,01,r101.bk2.col8 00,80,r103.bk2",
        )
        .unwrap();
        assert_eq!(
            atk.targets,
            vec![DRAMAddr::new(2, 100, 0), DRAMAddr::new(2, 102, 0)]
        );
        let expected: BTreeSet<Flip> = [
            Flip::new(DRAMAddr::new(2, 101, 8), 0, false),
            Flip::new(DRAMAddr::new(2, 101, 8), 0, true),
            Flip::new(DRAMAddr::new(2, 103, 0), 7, true),
        ]
        .into_iter()
        .collect();
        assert_eq!(atk.flips, expected);
    }

    #[test]
    fn test_decode_line_errors() {
        for bad in [
            "r100.bk2 f0,0f,r100.bk2",
            "r100.bk2/x : f0,0f,r100.bk2",
            "r100.bk2 : f0,0f",
            "r100.bk2 : f0,0g,r100.bk2",
            " : f0,0f,r100.bk2",
        ] {
            assert!(
                matches!(Attack::decode_line(bad), Err(Error::Parse { .. })),
                "'{}' decoded",
                bad
            );
        }
    }

    #[test]
    fn test_decode_line_far_victim() {
        let _ = env_logger::builder().is_test(true).try_init();
        let atk = Attack::decode_line("r100.bk2 : ff,fe,r500.bk2").unwrap();
        assert_eq!(
            atk.flips.into_iter().collect::<Vec<_>>(),
            vec![Flip::new(DRAMAddr::new(2, 500, 0), 0, false)]
        );
    }

    #[test]
    fn test_near_target_compares_rows_only() {
        let targets = [DRAMAddr::new(2, 100, 0), DRAMAddr::new(2, 102, 0)];
        assert!(near_target(&targets, &DRAMAddr::new(2, 101, 8)));
        assert!(near_target(&targets, &DRAMAddr::new(2, 103, 0)));
        assert!(near_target(&targets, &DRAMAddr::new(7, 99, 0)));
        assert!(!near_target(&targets, &DRAMAddr::new(2, 500, 0)));
        assert!(!near_target(&targets, &DRAMAddr::new(2, 100, 0)));
        assert!(!near_target(&[], &DRAMAddr::new(2, 101, 0)));
    }

    #[test]
    fn test_decode_line_without_victims() {
        let atk = Attack::decode_line("r5.bk0 : ").unwrap();
        assert!(atk.flips.is_empty());
    }

    #[test]
    fn test_encode_ones_background() {
        let atk = Attack::decode_line("r100.bk2 : f0,0f,r100.bk2").unwrap();
        let encoded = atk.encode_with(&[0xff]);
        assert_eq!(
            encoded,
            "b02.r000100.c0000 : (b02.r000100.c0000|ef|ff) (b02.r000100.c0000|df|ff) \
             (b02.r000100.c0000|bf|ff) (b02.r000100.c0000|7f|ff)"
        );
    }

    #[test]
    fn test_encode_both_backgrounds() {
        let atk = attack(&[100, 102], &[flip(101, 0, true)]);
        let encoded = atk.encode();
        let lines: Vec<&str> = encoded.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "b01.r000100.c0000 / b01.r000102.c0000 : ");
        assert_eq!(
            lines[1],
            "b01.r000100.c0000 / b01.r000102.c0000 : (b01.r000101.c0000|01|00)"
        );
    }

    #[test]
    fn test_diff() {
        let a = attack(&[1], &[flip(2, 0, true), flip(2, 1, true)]);
        let b = attack(&[1], &[flip(2, 1, true), flip(2, 2, false)]);
        let d = a.diff(&b).unwrap();
        assert_eq!(d.self_only, attack(&[1], &[flip(2, 0, true)]));
        assert_eq!(d.common, attack(&[1], &[flip(2, 1, true)]));
        assert_eq!(d.other_only, attack(&[1], &[flip(2, 2, false)]));
    }

    #[test]
    fn test_diff_antisymmetric() {
        let a = attack(&[1, 3], &[flip(2, 0, true), flip(2, 1, true), flip(4, 7, false)]);
        let b = attack(&[1, 3], &[flip(2, 1, true), flip(4, 6, false)]);
        let ab = a.diff(&b).unwrap();
        let ba = b.diff(&a).unwrap();
        assert_eq!(ab.self_only, ba.other_only);
        assert_eq!(ab.other_only, ba.self_only);
        assert_eq!(ab.common, ba.common);
    }

    #[test]
    fn test_merge_commutative_idempotent() {
        let a = attack(&[1], &[flip(2, 0, true)]);
        let b = attack(&[1], &[flip(2, 1, true), flip(0, 3, false)]);
        assert_eq!(a.merge(&b).unwrap(), b.merge(&a).unwrap());
        assert_eq!(a.merge(&a).unwrap(), a);
        assert_eq!(a.merge(&b).unwrap().flips.len(), 3);
    }

    #[test]
    fn test_target_mismatch() {
        let a = attack(&[1], &[]);
        let b = attack(&[1, 3], &[]);
        assert!(matches!(a.diff(&b), Err(Error::TargetMismatch { .. })));
        assert!(matches!(a.merge(&b), Err(Error::TargetMismatch { .. })));
        // target order matters
        let c = attack(&[3, 1], &[]);
        assert!(matches!(b.merge(&c), Err(Error::TargetMismatch { .. })));
    }

    #[test]
    fn test_cmp_targets() {
        let a = attack(&[1, 3], &[]);
        assert_eq!(a.cmp_targets(&attack(&[1, 4], &[])), Ordering::Less);
        assert_eq!(a.cmp_targets(&attack(&[1], &[])), Ordering::Greater);
        assert_eq!(a.cmp_targets(&attack(&[1, 3], &[flip(2, 0, true)])), Ordering::Equal);
    }

    #[test]
    fn test_to_physmem() {
        let layout = MemoryLayout::default();
        let atk = attack(&[100, 102], &[flip(101, 0, true), flip(101, 3, false)]);
        let phys = atk.to_physmem(&layout);
        assert_eq!(phys.targets.len(), 2);
        assert_eq!(phys.flips.len(), 2);
        for t in phys.targets {
            assert_eq!(layout.phys_to_dram(t).bank, 1);
        }
    }
}
