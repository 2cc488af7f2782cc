use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::memory::DRAMAddr;
use crate::util::{
    HASH_FN_CNT, LAYOUT_RECORD_SIZE, is_contiguous, parity, trailing_zero_count,
};
use crate::{Error, Result};

/// DRAM addressing layout.
///
/// Defines how physical addresses map to DRAM organization (bank, row, column).
/// Rows and columns are contiguous bit ranges of the physical address. The bank is
/// selected by up to [`HASH_FN_CNT`] XOR hash functions, each the parity of the address
/// bits selected by a mask.
///
/// A layout is validated on construction and immutable afterwards. Every hash function
/// needs at least one bit outside the row and column masks so that
/// [`MemoryLayout::dram_to_phys`] can satisfy it without touching row or column bits.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(try_from = "LayoutDef", into = "LayoutDef")]
pub struct MemoryLayout {
    hash_fns: [u64; HASH_FN_CNT],
    hash_count: usize,
    row_mask: u64,
    col_mask: u64,
    row_shift: u32,
    col_shift: u32,
    /// Free address bits to toggle to flip the parity of exactly one hash function
    corrections: [u64; HASH_FN_CNT],
}

/// Serialized form of a [`MemoryLayout`].
#[derive(Serialize, Deserialize, Debug, Clone)]
struct LayoutDef {
    hash_fns: Vec<u64>,
    row_mask: u64,
    col_mask: u64,
}

impl MemoryLayout {
    /// Creates and validates a memory layout.
    ///
    /// # Arguments
    ///
    /// * `hash_fns` - Bank hash function masks, at most [`HASH_FN_CNT`]
    /// * `row_mask` - Physical address bits holding the row
    /// * `col_mask` - Physical address bits holding the column
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the masks are not a consistent partition of the
    /// physical address (see [`MemoryLayout`]).
    pub fn new(hash_fns: &[u64], row_mask: u64, col_mask: u64) -> Result<Self> {
        if hash_fns.len() > HASH_FN_CNT {
            return Err(Error::Config(format!(
                "{} hash functions given, at most {} supported",
                hash_fns.len(),
                HASH_FN_CNT
            )));
        }
        for (name, mask) in [("row", row_mask), ("column", col_mask)] {
            if !is_contiguous(mask) {
                return Err(Error::Config(format!(
                    "{} mask {:#x} is not a contiguous bit range",
                    name, mask
                )));
            }
        }
        if row_mask & col_mask != 0 {
            return Err(Error::Config(format!(
                "row mask {:#x} and column mask {:#x} overlap",
                row_mask, col_mask
            )));
        }
        let free = !(row_mask | col_mask);
        for (i, &h) in hash_fns.iter().enumerate() {
            if h & free == 0 {
                return Err(Error::Config(format!(
                    "hash function {} ({:#x}) has no bit outside the row and column masks",
                    i, h
                )));
            }
        }
        let corrections = correction_masks(hash_fns, free);

        let mut layout = MemoryLayout {
            hash_fns: [0; HASH_FN_CNT],
            hash_count: hash_fns.len(),
            row_mask,
            col_mask,
            row_shift: trailing_zero_count(row_mask)? as u32,
            col_shift: trailing_zero_count(col_mask)? as u32,
            corrections: [0; HASH_FN_CNT],
        };
        layout.hash_fns[..hash_fns.len()].copy_from_slice(hash_fns);
        layout.corrections[..corrections.len()].copy_from_slice(&corrections);
        debug!("memory layout {}", layout);
        Ok(layout)
    }

    /// Parses the fixed-size binary layout record.
    ///
    /// The record consists of nine native-endian `u64` values: [`HASH_FN_CNT`] hash function
    /// masks, the number of active hash functions, the row mask and the column mask.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if `bytes` is not exactly [`LAYOUT_RECORD_SIZE`] long
    /// and [`Error::Config`] if the described layout is invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != LAYOUT_RECORD_SIZE {
            return Err(Error::InvalidInput("layout record must be 72 bytes"));
        }
        let mut words = [0u64; HASH_FN_CNT + 3];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(8)) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            *word = u64::from_ne_bytes(buf);
        }
        let hash_count = words[HASH_FN_CNT] as usize;
        if hash_count > HASH_FN_CNT {
            return Err(Error::Config(format!(
                "record announces {} hash functions, at most {} supported",
                hash_count, HASH_FN_CNT
            )));
        }
        MemoryLayout::new(
            &words[..hash_count],
            words[HASH_FN_CNT + 1],
            words[HASH_FN_CNT + 2],
        )
    }

    /// Encodes the layout as the binary record read by [`MemoryLayout::from_bytes`].
    pub fn to_bytes(&self) -> [u8; LAYOUT_RECORD_SIZE] {
        let mut out = [0u8; LAYOUT_RECORD_SIZE];
        let words = self
            .hash_fns
            .iter()
            .copied()
            .chain([self.hash_count as u64, self.row_mask, self.col_mask]);
        for (chunk, word) in out.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        out
    }

    /// Loads a layout from a binary record file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not hold a valid record.
    pub fn from_binfile(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut contents = Vec::with_capacity(LAYOUT_RECORD_SIZE);
        file.read_to_end(&mut contents)?;
        let layout = MemoryLayout::from_bytes(&contents)?;
        info!("Loaded memory layout from {}", path.as_ref().display());
        Ok(layout)
    }

    /// Loads a layout from a JSON file of the form
    /// `{ "hash_fns": [..], "row_mask": .., "col_mask": .. }`.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed, or the layout is invalid.
    pub fn from_jsonfile(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        let layout: MemoryLayout = serde_json::from_str(&contents)?;
        info!("Loaded memory layout from {}", path.as_ref().display());
        Ok(layout)
    }

    /// Loads a layout from a file, choosing JSON for `.json` files and the binary record
    /// otherwise.
    ///
    /// # Errors
    ///
    /// See [`MemoryLayout::from_jsonfile`] and [`MemoryLayout::from_binfile`].
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self> {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("json") => MemoryLayout::from_jsonfile(path),
            _ => MemoryLayout::from_binfile(path),
        }
    }
}

impl MemoryLayout {
    /// Returns the active bank hash function masks.
    pub fn hash_fns(&self) -> &[u64] {
        &self.hash_fns[..self.hash_count]
    }

    /// Returns the row mask.
    pub fn row_mask(&self) -> u64 {
        self.row_mask
    }

    /// Returns the column mask.
    pub fn col_mask(&self) -> u64 {
        self.col_mask
    }

    /// Returns the number of banks in this layout.
    pub fn num_banks(&self) -> u64 {
        1 << self.hash_count
    }

    /// Returns the number of rows per bank in this layout.
    pub fn row_count(&self) -> u64 {
        1 << self.row_mask.count_ones()
    }
}

impl MemoryLayout {
    /// Translates a physical address into its DRAM address.
    pub fn phys_to_dram(&self, p_addr: u64) -> DRAMAddr {
        let bank = self
            .hash_fns()
            .iter()
            .enumerate()
            .fold(0, |bank, (i, &h)| bank | (parity(p_addr & h) << i));
        DRAMAddr {
            bank,
            row: (p_addr & self.row_mask) >> self.row_shift,
            col: (p_addr & self.col_mask) >> self.col_shift,
        }
    }

    /// Reconstructs a physical address that maps to `d_addr`.
    ///
    /// Row and column bits are placed directly; then every hash function whose parity
    /// disagrees with the requested bank bit is fixed by toggling its correction bits,
    /// which lie outside the row and column masks and affect no other correctable hash
    /// function. Hash functions implied by the others are left as they fall out.
    ///
    /// Several physical addresses map to the same DRAM address; one representative is
    /// returned. Row and column values wider than their masks are truncated. Banks no
    /// physical address maps to (with implied hash functions) are not reproduced.
    pub fn dram_to_phys(&self, d_addr: &DRAMAddr) -> u64 {
        let mut p_addr = ((d_addr.row << self.row_shift) & self.row_mask)
            | ((d_addr.col << self.col_shift) & self.col_mask);
        for (i, &h) in self.hash_fns().iter().enumerate() {
            let correction = self.corrections[i];
            if correction != 0 && parity(p_addr & h) != (d_addr.bank >> i) & 1 {
                p_addr ^= correction;
            }
        }
        p_addr
    }
}

/// Computes, for every hash function, free address bits whose toggling flips the parity of
/// that hash function only.
///
/// The least-significant free bit is used whenever no other hash function contains it.
/// Otherwise the masks restricted to free bits are solved over GF(2). A hash function whose
/// restricted mask depends on earlier ones gets no correction: its parity follows from the
/// others on every address [`MemoryLayout::phys_to_dram`] produces.
fn correction_masks(hash_fns: &[u64], free: u64) -> Vec<u64> {
    let restricted: Vec<u64> = hash_fns.iter().map(|h| h & free).collect();
    let mut solved: Option<Vec<u64>> = None;
    let mut out = Vec::with_capacity(restricted.len());
    for (i, r) in restricted.iter().enumerate() {
        let lsb = 1u64 << r.trailing_zeros();
        let shared = restricted
            .iter()
            .enumerate()
            .any(|(j, other)| j != i && other & lsb != 0);
        if !shared {
            out.push(lsb);
            continue;
        }
        let solved = solved.get_or_insert_with(|| {
            debug!("hash functions share free bits, solving correction masks");
            solve_gf2(&restricted)
        });
        if solved[i] == 0 {
            debug!(
                "hash function {} ({:#x}) is implied by the others",
                i, hash_fns[i]
            );
        }
        out.push(solved[i]);
    }
    out
}

/// Gauss-Jordan elimination over GF(2).
///
/// For every row `i` independent of the rows before it, returns `v_i` with
/// `parity(rows[j] & v_i) == (i == j)` for all independent rows `j`. Dependent rows get 0.
fn solve_gf2(rows: &[u64]) -> Vec<u64> {
    let n = rows.len();
    let mut rows = rows.to_vec();
    // which input rows were combined into each reduced row
    let mut combos: Vec<u64> = (0..n).map(|i| 1 << i).collect();
    let mut pivots: Vec<Option<u32>> = vec![None; n];
    for k in 0..n {
        if rows[k] == 0 {
            continue;
        }
        let pivot = rows[k].trailing_zeros();
        pivots[k] = Some(pivot);
        for j in 0..n {
            if j != k && (rows[j] >> pivot) & 1 == 1 {
                rows[j] ^= rows[k];
                combos[j] ^= combos[k];
            }
        }
    }
    (0..n)
        .map(|i| match pivots[i] {
            None => 0,
            Some(_) => pivots
                .iter()
                .enumerate()
                .filter_map(|(k, p)| p.map(|p| (k, p)))
                .filter(|&(k, _)| (combos[k] >> i) & 1 == 1)
                .fold(0, |v, (_, p)| v | (1 << p)),
        })
        .collect()
}

/// The reference layout of the analysis tools: five bank hash functions, rows in bits
/// 18..=35 and columns in bits 0..=12.
impl Default for MemoryLayout {
    fn default() -> Self {
        let hash_fns = [0x2040, 0x44000, 0x88000, 0x110000, 0x220000];
        let mut hash_masks = [0; HASH_FN_CNT];
        hash_masks[..hash_fns.len()].copy_from_slice(&hash_fns);
        MemoryLayout {
            hash_fns: hash_masks,
            hash_count: hash_fns.len(),
            row_mask: 0xffffc0000,
            col_mask: (1 << 13) - 1,
            row_shift: 18,
            col_shift: 0,
            corrections: [1 << 13, 1 << 14, 1 << 15, 1 << 16, 1 << 17, 0],
        }
    }
}

impl Display for MemoryLayout {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let fns = self
            .hash_fns()
            .iter()
            .map(|h| format!("{:#x}", h))
            .collect::<Vec<_>>()
            .join(", ");
        write!(
            f,
            "{{{}}} - row {:#x} col {:#x}",
            fns, self.row_mask, self.col_mask
        )
    }
}

impl TryFrom<LayoutDef> for MemoryLayout {
    type Error = Error;

    fn try_from(def: LayoutDef) -> Result<Self> {
        MemoryLayout::new(&def.hash_fns, def.row_mask, def.col_mask)
    }
}

impl From<MemoryLayout> for LayoutDef {
    fn from(layout: MemoryLayout) -> Self {
        LayoutDef {
            hash_fns: layout.hash_fns().to_vec(),
            row_mask: layout.row_mask,
            col_mask: layout.col_mask,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng as _;

    const PHYS_BITS: u64 = (1 << 36) - 1;

    fn default_from_new() -> MemoryLayout {
        MemoryLayout::new(
            &[0x2040, 0x44000, 0x88000, 0x110000, 0x220000],
            0xffffc0000,
            0x1fff,
        )
        .expect("valid layout")
    }

    #[test]
    fn test_default_matches_validated() {
        assert_eq!(MemoryLayout::default(), default_from_new());
    }

    #[test]
    fn test_phys_to_dram() {
        let layout = MemoryLayout::default();
        let d = layout.phys_to_dram(0);
        assert_eq!(d, DRAMAddr::new(0, 0, 0));
        // bit 13 only feeds hash function 0
        let d = layout.phys_to_dram(1 << 13);
        assert_eq!(d, DRAMAddr::new(1, 0, 0));
        // bit 18 is the lowest row bit and feeds hash function 1
        let d = layout.phys_to_dram(1 << 18);
        assert_eq!(d, DRAMAddr::new(0b10, 1, 0));
        let d = layout.phys_to_dram(0x1234);
        assert_eq!(d.col, 0x1234);
    }

    #[test]
    fn test_num_banks() {
        let layout = MemoryLayout::default();
        assert_eq!(layout.num_banks(), 32);
        assert_eq!(layout.row_count(), 1 << 18);
    }

    #[test]
    fn test_round_trip_random() {
        let layout = MemoryLayout::default();
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let p = rng.random::<u64>() & PHYS_BITS;
            let d = layout.phys_to_dram(p);
            let back = layout.dram_to_phys(&d);
            assert_eq!(layout.phys_to_dram(back), d, "p = {:#x}, back = {:#x}", p, back);
        }
    }

    #[test]
    fn test_round_trip_all_banks() {
        let layout = MemoryLayout::default();
        for bank in 0..layout.num_banks() {
            let d = DRAMAddr::new(bank, 12345, 4000);
            assert_eq!(layout.phys_to_dram(layout.dram_to_phys(&d)), d);
        }
    }

    #[test]
    fn test_shared_free_bits_are_solved() {
        // bit 13 is free and shared by both hash functions
        let layout = MemoryLayout::new(&[0x6000, 0x2000 | (1 << 20)], 0xf0000, 0x1fff)
            .expect("solvable layout");
        for bank in 0..layout.num_banks() {
            for row in [0, 1, 7, 15] {
                let d = DRAMAddr::new(bank, row, 17);
                assert_eq!(layout.phys_to_dram(layout.dram_to_phys(&d)), d);
            }
        }
    }

    #[test]
    fn test_dependent_free_bits_round_trip() {
        // both hash functions only have free bit 13; their XOR depends on bits 6 and 18 alone
        let layout =
            MemoryLayout::new(&[0x2040, 0x42000], 0xffffc0000, 0x1fff).expect("loadable layout");
        let mut rng = rand::rng();
        for _ in 0..10_000 {
            let p = rng.random::<u64>() & PHYS_BITS;
            let d = layout.phys_to_dram(p);
            let back = layout.dram_to_phys(&d);
            assert_eq!(layout.phys_to_dram(back), d, "p = {:#x}, back = {:#x}", p, back);
        }
    }

    #[test]
    fn test_dependent_hash_function_gets_no_correction() {
        let layout = MemoryLayout::new(&[0x2000, 0x2000 | (1 << 16)], 0xf0000, 0x1fff)
            .expect("loadable layout");
        assert_eq!(layout.corrections[..2], [1 << 13, 0]);
        for row in 0..16 {
            for bank in 0..2 {
                let p = layout.dram_to_phys(&DRAMAddr::new(bank, row, 5));
                let d = layout.phys_to_dram(p);
                assert_eq!((d.bank & 1, d.row, d.col), (bank, row, 5));
                // the second hash bit follows from the first and row bit 0
                assert_eq!(d.bank >> 1, bank ^ (row & 1));
            }
        }
    }

    #[test]
    fn test_invalid_layouts() {
        // hash function entirely inside row/column bits
        assert!(matches!(
            MemoryLayout::new(&[0x40], 0xffffc0000, 0x1fff),
            Err(Error::Config(_))
        ));
        // overlapping row and column masks
        assert!(matches!(
            MemoryLayout::new(&[0x2000], 0xff000, 0x1fff),
            Err(Error::Config(_))
        ));
        // non-contiguous row mask
        assert!(matches!(
            MemoryLayout::new(&[0x2000], 0xf00000 | 0x40000, 0x1fff),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MemoryLayout::new(&[0x2000], 0, 0x1fff),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            MemoryLayout::new(&[0x2000; 7], 0xffffc0000, 0x1fff),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_binary_record() {
        let layout = MemoryLayout::default();
        let bytes = layout.to_bytes();
        assert_eq!(bytes.len(), 72);
        assert_eq!(&bytes[..8], &0x2040u64.to_ne_bytes());
        assert_eq!(&bytes[48..56], &5u64.to_ne_bytes());
        assert_eq!(MemoryLayout::from_bytes(&bytes).unwrap(), layout);
    }

    #[test]
    fn test_binary_record_errors() {
        assert!(matches!(
            MemoryLayout::from_bytes(&[0u8; 64]),
            Err(Error::InvalidInput(_))
        ));
        let mut bytes = MemoryLayout::default().to_bytes();
        bytes[48..56].copy_from_slice(&7u64.to_ne_bytes());
        assert!(matches!(
            MemoryLayout::from_bytes(&bytes),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_json() -> anyhow::Result<()> {
        let layout: MemoryLayout = serde_json::from_str(
            r#"{"hash_fns": [8256, 278528], "row_mask": 68719214592, "col_mask": 8191}"#,
        )?;
        assert_eq!(layout.hash_fns(), &[0x2040, 0x44000]);
        assert_eq!(layout.num_banks(), 4);
        let json = serde_json::to_string(&layout)?;
        let back: MemoryLayout = serde_json::from_str(&json)?;
        assert_eq!(back, layout);
        Ok(())
    }

    #[test]
    fn test_json_invalid_layout() {
        let res: std::result::Result<MemoryLayout, _> =
            serde_json::from_str(r#"{"hash_fns": [64], "row_mask": 68719214592, "col_mask": 8191}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_display() {
        let layout = MemoryLayout::new(&[0x2040], 0xffffc0000, 0x1fff).unwrap();
        assert_eq!(layout.to_string(), "{0x2040} - row 0xffffc0000 col 0x1fff");
    }
}
