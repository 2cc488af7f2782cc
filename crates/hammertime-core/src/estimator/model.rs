use serde::Serialize;

use crate::estimator::VictimPage;

/// Trait for judging whether flipped pages are exploitable.
///
/// Implementors decide per page whether the flips give the attacker what the exploit
/// needs, e.g. a flip in a page table entry bit that redirects a mapping.
///
/// # Examples
///
/// ```
/// use hammertime_core::estimator::{ExploitModel, VictimPage};
///
/// /// Succeeds on pages with at least two flipped bits.
/// struct MultiFlip;
///
/// impl ExploitModel for MultiFlip {
///     fn check_page(&self, page: &VictimPage) -> bool {
///         page.flip_count() >= 2
///     }
/// }
/// ```
pub trait ExploitModel {
    /// Returns true if the flips in `page` are exploitable.
    fn check_page(&self, page: &VictimPage) -> bool;

    /// Returns the frame numbers of all exploitable pages of one attack.
    fn check_attack(&self, pages: &[VictimPage]) -> Vec<u64> {
        pages
            .iter()
            .filter(|page| self.check_page(page))
            .map(|page| page.pfn)
            .collect()
    }

    /// Applies [`ExploitModel::check_attack`] to every attack.
    fn check_attacks(&self, attacks: &[Vec<VictimPage>]) -> Vec<Vec<u64>> {
        attacks
            .iter()
            .map(|pages| self.check_attack(pages))
            .collect()
    }
}

/// Model under which every flipped page is exploitable.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AnyFlip;

impl ExploitModel for AnyFlip {
    fn check_page(&self, page: &VictimPage) -> bool {
        !page.pullups.is_empty() || !page.pulldowns.is_empty()
    }
}

/// Model requiring a flip of specific bits at one byte offset of the page.
///
/// A page is exploitable if any bit of `mask` at `byte_offset` flipped in the required
/// direction.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BitTarget {
    /// Offset of the target byte within the page
    pub byte_offset: u64,
    /// Bits of interest
    pub mask: u8,
    /// Required flip direction (true: 0→1)
    pub pullup: bool,
}

impl ExploitModel for BitTarget {
    fn check_page(&self, page: &VictimPage) -> bool {
        let flipped = if self.pullup {
            page.pullup_mask(self.byte_offset)
        } else {
            page.pulldown_mask(self.byte_offset)
        };
        flipped & self.mask != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::PageBitFlip;

    fn page(pfn: u64, ups: &[(u64, u8)], downs: &[(u64, u8)]) -> VictimPage {
        let flips = |l: &[(u64, u8)]| {
            l.iter()
                .map(|&(byte_offset, mask)| PageBitFlip { byte_offset, mask })
                .collect()
        };
        VictimPage {
            pfn,
            pullups: flips(ups),
            pulldowns: flips(downs),
        }
    }

    #[test]
    fn test_any_flip() {
        let pages = vec![page(1, &[(0, 1)], &[]), page(2, &[], &[(8, 2)])];
        assert_eq!(AnyFlip.check_attack(&pages), vec![1, 2]);
        assert!(!AnyFlip.check_page(&page(3, &[], &[])));
    }

    #[test]
    fn test_bit_target() {
        let model = BitTarget {
            byte_offset: 8,
            mask: 0x0c,
            pullup: false,
        };
        assert!(model.check_page(&page(1, &[], &[(8, 0x04)])));
        assert!(!model.check_page(&page(1, &[(8, 0x04)], &[])));
        assert!(!model.check_page(&page(1, &[], &[(8, 0x01)])));
        assert!(!model.check_page(&page(1, &[], &[(9, 0x04)])));
    }

    #[test]
    fn test_check_attacks() {
        let attacks = vec![
            vec![page(1, &[(0, 1)], &[])],
            vec![],
            vec![page(2, &[], &[]), page(3, &[(4, 4)], &[])],
        ];
        assert_eq!(
            AnyFlip.check_attacks(&attacks),
            vec![vec![1], vec![], vec![3]]
        );
    }
}
