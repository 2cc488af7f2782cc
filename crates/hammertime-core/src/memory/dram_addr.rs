use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::Error;

/// DRAM address with bank, row, and column components.
///
/// Represents the physical organization of a memory address in DRAM. `bank` is a
/// simplified address of channel, DIMM, rank, bank group and bank: everything that
/// eventually selects one bank.
///
/// Equality, ordering and hashing are all defined on [`DRAMAddr::pack`], so two addresses
/// compare equal exactly when their packed values do.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
pub struct DRAMAddr {
    /// Bank number
    pub bank: u64,
    /// Row number
    pub row: u64,
    /// Column number
    pub col: u64,
}

impl DRAMAddr {
    /// Creates a new DRAM address.
    ///
    /// # Arguments
    ///
    /// * `bank` - Bank number
    /// * `row` - Row number
    /// * `col` - Column number
    pub const fn new(bank: u64, row: u64, col: u64) -> Self {
        DRAMAddr { bank, row, col }
    }

    /// Packs the address into a single comparable value.
    ///
    /// The canonical representation is `col + (row << 16) + (bank << 32)`.
    pub const fn pack(&self) -> u64 {
        self.col
            .wrapping_add(self.row << 16)
            .wrapping_add(self.bank << 32)
    }

    /// Returns true if both addresses are in the same bank.
    pub fn same_bank(&self, other: &DRAMAddr) -> bool {
        self.bank == other.bank
    }

    /// Returns true if both addresses are in the same row of the same bank.
    pub fn same_row(&self, other: &DRAMAddr) -> bool {
        self.bank == other.bank && self.row == other.row
    }
}

impl PartialEq for DRAMAddr {
    fn eq(&self, other: &Self) -> bool {
        self.pack() == other.pack()
    }
}

impl Eq for DRAMAddr {}

impl PartialOrd for DRAMAddr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DRAMAddr {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pack().cmp(&other.pack())
    }
}

impl Hash for DRAMAddr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pack().hash(state);
    }
}

/// Component-wise addition. Expresses address deltas, wraps on overflow.
impl Add for DRAMAddr {
    type Output = DRAMAddr;

    fn add(self, rhs: DRAMAddr) -> DRAMAddr {
        DRAMAddr {
            bank: self.bank.wrapping_add(rhs.bank),
            row: self.row.wrapping_add(rhs.row),
            col: self.col.wrapping_add(rhs.col),
        }
    }
}

/// Component-wise subtraction. Not saturating: underflow wraps like unsigned arithmetic.
impl Sub for DRAMAddr {
    type Output = DRAMAddr;

    fn sub(self, rhs: DRAMAddr) -> DRAMAddr {
        DRAMAddr {
            bank: self.bank.wrapping_sub(rhs.bank),
            row: self.row.wrapping_sub(rhs.row),
            col: self.col.wrapping_sub(rhs.col),
        }
    }
}

impl Display for DRAMAddr {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(fmt, "b{:02}.r{:06}.c{:04}", self.bank, self.row, self.col)
    }
}

/// Parses the report input form `r<row>.bk<bank>[.col<col>]` as well as the rendered form
/// `b<bank>.r<row>.c<col>`. The column defaults to 0 when absent.
///
/// Parse errors carry no line number; callers attach it.
impl FromStr for DRAMAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let first = parts.next().unwrap_or_default();
        let number = |part: &str, prefix: &str| -> Result<u64, Error> {
            part.strip_prefix(prefix)
                .and_then(|digits| digits.parse().ok())
                .ok_or_else(|| Error::parse(0, s, format!("expected '{}<number>'", prefix)))
        };
        let addr = if first.starts_with("bk") {
            return Err(Error::parse(0, s, "address must start with a row or bank"));
        } else if first.starts_with('r') {
            let row = number(first, "r")?;
            let bank = number(parts.next().unwrap_or_default(), "bk")?;
            let col = match parts.next() {
                Some(col) => number(col, "col")?,
                None => 0,
            };
            DRAMAddr::new(bank, row, col)
        } else if first.starts_with('b') {
            let bank = number(first, "b")?;
            let row = number(parts.next().unwrap_or_default(), "r")?;
            let col = match parts.next() {
                Some(col) => number(col, "c")?,
                None => 0,
            };
            DRAMAddr::new(bank, row, col)
        } else {
            return Err(Error::parse(0, s, "unknown address form"));
        };
        if parts.next().is_some() {
            return Err(Error::parse(0, s, "trailing address components"));
        }
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack() {
        assert_eq!(DRAMAddr::new(0, 0, 0).pack(), 0);
        assert_eq!(DRAMAddr::new(1, 2, 3).pack(), 3 + (2 << 16) + (1 << 32));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let base = DRAMAddr::new(3, 100, 20);
        assert!(DRAMAddr::new(4, 0, 0) > base);
        assert!(DRAMAddr::new(3, 101, 0) > base);
        assert!(DRAMAddr::new(3, 100, 21) > base);
        assert!(DRAMAddr::new(2, 9999, 9999) < base);
        assert_eq!(DRAMAddr::new(3, 100, 20), base);
    }

    #[test]
    fn test_add_sub() {
        let a = DRAMAddr::new(2, 100, 8);
        let delta = DRAMAddr::new(0, 1, 0);
        assert_eq!(a + delta, DRAMAddr::new(2, 101, 8));
        assert_eq!((a + delta) - delta, a);
        let wrapped = DRAMAddr::new(0, 0, 0) - delta;
        assert_eq!(wrapped.row, u64::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(DRAMAddr::new(2, 100, 7).to_string(), "b02.r000100.c0007");
        assert_eq!(DRAMAddr::new(17, 123456, 8191).to_string(), "b17.r123456.c8191");
    }

    #[test]
    fn test_parse_input_form() {
        assert_eq!(
            "r16447.bk18.col3994".parse::<DRAMAddr>().unwrap(),
            DRAMAddr::new(18, 16447, 3994)
        );
        assert_eq!(
            "r100.bk2".parse::<DRAMAddr>().unwrap(),
            DRAMAddr::new(2, 100, 0)
        );
    }

    #[test]
    fn test_parse_rendered_form() {
        let addr = DRAMAddr::new(5, 4242, 12);
        assert_eq!(addr.to_string().parse::<DRAMAddr>().unwrap(), addr);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "x1.bk2", "r.bk2", "r1.b2", "r1", "r1.bk2.col", "r1.bk2.col3.p4", "bk2.r1"] {
            let err = bad.parse::<DRAMAddr>().unwrap_err();
            match err {
                Error::Parse { token, .. } => assert_eq!(token, bad),
                e => panic!("unexpected error {:?}", e),
            }
        }
    }

    #[test]
    fn test_same_bank_row() {
        let a = DRAMAddr::new(1, 10, 0);
        assert!(a.same_bank(&DRAMAddr::new(1, 11, 0)));
        assert!(!a.same_row(&DRAMAddr::new(1, 11, 0)));
        assert!(a.same_row(&DRAMAddr::new(1, 10, 64)));
    }
}
