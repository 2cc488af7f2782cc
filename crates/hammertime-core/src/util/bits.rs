use crate::{Error, Result};

/// Returns the parity (population count modulo 2) of `word`.
///
/// # Examples
///
/// ```
/// use hammertime_core::util::parity;
///
/// assert_eq!(parity(0b1011), 1);
/// assert_eq!(parity(0x2040), 0);
/// ```
pub const fn parity(word: u64) -> u64 {
    (word.count_ones() & 1) as u64
}

/// Returns the index of the least-significant set bit of `word`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for `word == 0`, which has no set bit.
pub fn trailing_zero_count(word: u64) -> Result<u8> {
    if word == 0 {
        return Err(Error::InvalidInput("zero word has no least-significant set bit"));
    }
    Ok(word.trailing_zeros() as u8)
}

/// Iterates the indices of all set bits in `word`, least-significant first.
pub fn set_bits(word: u64) -> impl Iterator<Item = u8> {
    let mut rest = word;
    std::iter::from_fn(move || {
        if rest == 0 {
            return None;
        }
        let bit = rest.trailing_zeros() as u8;
        rest &= rest - 1;
        Some(bit)
    })
}

/// Returns true if the set bits of `mask` form a single contiguous run.
pub const fn is_contiguous(mask: u64) -> bool {
    if mask == 0 {
        return false;
    }
    let shifted = mask >> mask.trailing_zeros();
    shifted & (shifted.wrapping_add(1)) == 0
}
