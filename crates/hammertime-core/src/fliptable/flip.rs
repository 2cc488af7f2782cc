use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::memory::{DRAMAddr, MemoryLayout};
use crate::util::set_bits;
use crate::{Error, Result};

/// A single faulty bit at a DRAM address.
///
/// `pullup` is true for a 0→1 flip and false for a 1→0 flip. Flips order by address,
/// then bit, then direction.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flip {
    /// Victim address
    pub addr: DRAMAddr,
    /// Bit index; taken modulo 8 when selecting the bit within a byte
    pub bit: u8,
    /// Flip direction (true: 0→1)
    pub pullup: bool,
}

impl Flip {
    /// Creates a new flip.
    pub fn new(addr: DRAMAddr, bit: u8, pullup: bool) -> Self {
        Flip { addr, bit, pullup }
    }

    /// Reconstructs the corruption this flip causes on a byte.
    ///
    /// Without a `baseline`, pull-ups assume an all-zero and pull-downs an all-ones expected
    /// byte, the two backgrounds of a retention test.
    pub fn to_corruption(&self, baseline: Option<u8>) -> Corruption {
        let fmask = 1u8 << (self.bit % 8);
        let exp = baseline.unwrap_or(if self.pullup { 0x00 } else { 0xff });
        let got = if self.pullup {
            exp | fmask
        } else {
            exp & !fmask
        };
        Corruption {
            addr: self.addr,
            got,
            exp,
        }
    }

    /// Returns the same flip with its DRAM address reverse-translated to a physical address.
    pub fn to_physmem(&self, layout: &MemoryLayout) -> PhysFlip {
        PhysFlip {
            addr: layout.dram_to_phys(&self.addr),
            bit: self.bit,
            pullup: self.pullup,
        }
    }
}

/// A flip located by physical address.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFlip {
    /// Physical victim address
    pub addr: u64,
    /// Bit index
    pub bit: u8,
    /// Flip direction (true: 0→1)
    pub pullup: bool,
}

/// An observed byte corruption: the byte read back (`got`) differs from the byte written
/// (`exp`).
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Corruption {
    /// Victim address
    pub addr: DRAMAddr,
    /// Observed value
    pub got: u8,
    /// Expected value
    pub exp: u8,
}

impl Corruption {
    /// Creates a new corruption record.
    pub fn new(addr: DRAMAddr, got: u8, exp: u8) -> Self {
        Corruption { addr, got, exp }
    }

    /// Bits that were expected 0 but read 1.
    pub fn pullups(&self) -> u8 {
        !self.exp & self.got
    }

    /// Bits that were expected 1 but read 0.
    pub fn pulldowns(&self) -> u8 {
        self.exp & !self.got
    }

    /// Splits the corruption into its individual bit flips.
    pub fn to_flips(&self) -> BTreeSet<Flip> {
        let ups = set_bits(self.pullups() as u64).map(|bit| Flip::new(self.addr, bit, true));
        let downs = set_bits(self.pulldowns() as u64).map(|bit| Flip::new(self.addr, bit, false));
        ups.chain(downs).collect()
    }
}

impl Display for Corruption {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "({}|{:02x}|{:02x})", self.addr, self.got, self.exp)
    }
}

/// Parses a report flip group `<exp>,<got>,<addr>` with two hex digits per byte.
impl FromStr for Corruption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ',');
        let (Some(exp), Some(got), Some(addr)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::parse(0, s, "expected '<exp>,<got>,<addr>'"));
        };
        let byte = |hex: &str| -> Result<u8> {
            if hex.len() != 2 {
                return Err(Error::parse(0, s, format!("'{}' is not a two-digit hex byte", hex)));
            }
            u8::from_str_radix(hex, 16)
                .map_err(|_| Error::parse(0, s, format!("'{}' is not a two-digit hex byte", hex)))
        };
        Ok(Corruption {
            exp: byte(exp)?,
            got: byte(got)?,
            addr: addr.parse().map_err(|_| Error::parse(0, s, "invalid victim address"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: DRAMAddr = DRAMAddr::new(2, 100, 0);

    #[test]
    fn test_to_flips_mixed() {
        let flips = Corruption::new(ADDR, 0x0f, 0xf0).to_flips();
        assert_eq!(flips.len(), 8);
        let ups: Vec<u8> = flips.iter().filter(|f| f.pullup).map(|f| f.bit).collect();
        let downs: Vec<u8> = flips.iter().filter(|f| !f.pullup).map(|f| f.bit).collect();
        assert_eq!(ups, vec![0, 1, 2, 3]);
        assert_eq!(downs, vec![4, 5, 6, 7]);
    }

    #[test]
    fn test_to_flips_unchanged() {
        assert!(Corruption::new(ADDR, 0xaa, 0xaa).to_flips().is_empty());
    }

    #[test]
    fn test_to_corruption_default_baseline() {
        let up = Flip::new(ADDR, 3, true).to_corruption(None);
        assert_eq!((up.exp, up.got), (0x00, 0x08));
        let down = Flip::new(ADDR, 3, false).to_corruption(None);
        assert_eq!((down.exp, down.got), (0xff, 0xf7));
    }

    #[test]
    fn test_to_corruption_baseline() {
        // a pull-up on an all-ones background is invisible
        let up = Flip::new(ADDR, 0, true).to_corruption(Some(0xff));
        assert_eq!(up.exp, up.got);
        let down = Flip::new(ADDR, 9, false).to_corruption(Some(0xff));
        assert_eq!(down.got, 0xfd);
    }

    #[test]
    fn test_flip_corruption_inverse() {
        let flip = Flip::new(ADDR, 5, false);
        let flips = flip.to_corruption(None).to_flips();
        assert_eq!(flips.into_iter().collect::<Vec<_>>(), vec![flip]);
    }

    #[test]
    fn test_parse_corruption() {
        let c: Corruption = "87,c7,r16447.bk18.col3994".parse().unwrap();
        assert_eq!(c.exp, 0x87);
        assert_eq!(c.got, 0xc7);
        assert_eq!(c.addr, DRAMAddr::new(18, 16447, 3994));
        assert_eq!(c.pullups(), 0x40);
        assert_eq!(c.pulldowns(), 0);
    }

    #[test]
    fn test_parse_corruption_errors() {
        for bad in ["87,c7", "8,c7,r1.bk1", "zz,c7,r1.bk1", "87,c7,x", "870,c7,r1.bk1"] {
            assert!(
                matches!(bad.parse::<Corruption>(), Err(Error::Parse { .. })),
                "{} parsed",
                bad
            );
        }
    }

    #[test]
    fn test_display() {
        let c = Corruption::new(ADDR, 0x0f, 0xf0);
        assert_eq!(c.to_string(), "(b02.r000100.c0000|0f|f0)");
    }

    #[test]
    fn test_to_physmem() {
        let layout = MemoryLayout::default();
        let p = Flip::new(ADDR, 1, true).to_physmem(&layout);
        assert_eq!(layout.phys_to_dram(p.addr), ADDR);
        assert_eq!((p.bit, p.pullup), (1, true));
    }
}
