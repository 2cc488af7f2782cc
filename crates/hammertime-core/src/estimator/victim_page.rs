use itertools::Itertools;
use log::trace;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroU64;

use crate::fliptable::Attack;
use crate::memory::MemoryLayout;

/// A byte with one or more flipped bits at a particular offset within a page.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageBitFlip {
    /// Offset of the byte in its page
    pub byte_offset: u64,
    /// Flipped bits of the byte
    pub mask: u8,
}

/// The result of one Rowhammer attack on one physical page.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct VictimPage {
    /// Physical frame number
    pub pfn: u64,
    /// Bytes with 0→1 flips
    pub pullups: BTreeSet<PageBitFlip>,
    /// Bytes with 1→0 flips
    pub pulldowns: BTreeSet<PageBitFlip>,
}

impl VictimPage {
    /// Returns the pull-up mask at `byte_offset`, 0 if no bit flipped up there.
    pub fn pullup_mask(&self, byte_offset: u64) -> u8 {
        mask_at(&self.pullups, byte_offset)
    }

    /// Returns the pull-down mask at `byte_offset`, 0 if no bit flipped down there.
    pub fn pulldown_mask(&self, byte_offset: u64) -> u8 {
        mask_at(&self.pulldowns, byte_offset)
    }

    /// Returns the number of flipped bits in the page.
    pub fn flip_count(&self) -> u32 {
        self.pullups
            .iter()
            .chain(&self.pulldowns)
            .map(|f| f.mask.count_ones())
            .sum()
    }
}

fn mask_at(flips: &BTreeSet<PageBitFlip>, byte_offset: u64) -> u8 {
    flips
        .iter()
        .find(|f| f.byte_offset == byte_offset)
        .map_or(0, |f| f.mask)
}

/// Maps the flips of an attack onto the physical pages they hit.
///
/// Victim addresses are reverse-translated with `layout` and grouped by frame number
/// (`addr / page_size`), then by byte (`addr % page_size + bit / 8`). Per byte, all
/// pull-up bits and all pull-down bits are combined into one mask each. Pages appear in
/// ascending frame order.
pub fn map_attack(attack: &Attack, layout: &MemoryLayout, page_size: NonZeroU64) -> Vec<VictimPage> {
    let page_size = page_size.get();
    let phys = attack.to_physmem(layout);
    let mut pages = vec![];
    for (pfn, flips) in &phys.flips.iter().chunk_by(|f| f.addr / page_size) {
        let mut bytes: BTreeMap<u64, (u8, u8)> = BTreeMap::new();
        for flip in flips {
            let byte = flip.addr % page_size + (flip.bit / 8) as u64;
            let mask = 1u8 << (flip.bit % 8);
            let (ups, downs) = bytes.entry(byte).or_default();
            if flip.pullup {
                *ups |= mask;
            } else {
                *downs |= mask;
            }
        }
        let collect = |select: fn(&(u8, u8)) -> u8| -> BTreeSet<PageBitFlip> {
            bytes
                .iter()
                .map(|(&byte_offset, masks)| PageBitFlip {
                    byte_offset,
                    mask: select(masks),
                })
                .filter(|f| f.mask != 0)
                .collect()
        };
        let page = VictimPage {
            pfn,
            pullups: collect(|m| m.0),
            pulldowns: collect(|m| m.1),
        };
        if !page.pullups.is_empty() || !page.pulldowns.is_empty() {
            trace!("victim page {:#x}: {} flips", pfn, page.flip_count());
            pages.push(page);
        }
    }
    pages
}
