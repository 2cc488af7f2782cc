//! # Hammertime
//!
//! Command-line tools for Rowhammer fliptable analysis. The `hammertime` binary loads a DRAM
//! memory layout and profiled fliptables and
//!
//! - estimates exploit success statistics (`hammertime estimate`),
//! - compares two fliptables (`hammertime diff`),
//! - translates addresses between physical and DRAM form (`hammertime translate`).
//!
//! Memory layouts are read from JSON files (`.json`) or from the 72-byte binary layout record.
//! Set `RUST_LOG` to adjust the log level (default: `info`).
use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;

/// Initializes `env_logger` behind a progress bar bridge and returns the shared
/// [`MultiProgress`] that progress bars must be added to.
pub fn init_logging_with_progress() -> anyhow::Result<MultiProgress> {
    let logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let progress = MultiProgress::new();
    LogWrapper::new(progress.clone(), logger).try_init()?;
    Ok(progress)
}
