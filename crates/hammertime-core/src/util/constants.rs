/// Page shift value (12 bits) for 4KB pages
pub const PAGE_SHIFT: usize = 12;
/// Standard page size (4096 bytes)
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Maximum number of bank hash functions in a memory layout
pub const HASH_FN_CNT: usize = 6;
/// Size of the binary memory layout record: hash functions, hash count, row mask, column mask
pub const LAYOUT_RECORD_SIZE: usize = (HASH_FN_CNT + 3) * size_of::<u64>();

/// Time to scan one row for flips (ns)
pub const SCAN_TIME_NS: f64 = 60_000.0;
/// Time to fill one row with a data pattern (ns)
pub const FILL_TIME_NS: f64 = 1_500.0;

/// Memory covered by a single attack in KiB (one 8 KiB row)
pub const ATTACK_KIB: u64 = 8;
