use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroU64;

use crate::estimator::{ExploitModel, VictimPage, map_attack};
use crate::fliptable::Fliptable;
use crate::memory::MemoryLayout;
use crate::util::{ATTACK_KIB, FILL_TIME_NS, NamedProgress, PAGE_SIZE, SCAN_TIME_NS};
use crate::{Error, Result};

/// Computes the duration of one attack in milliseconds.
///
/// An attack fills every target row, hammers for `hammer_time_ns` and scans one and a half
/// rows per target for flips.
pub fn compute_attack_time(target_count: usize, hammer_time_ns: f64) -> f64 {
    let n = target_count as f64;
    let fill = FILL_TIME_NS * n;
    let scan = SCAN_TIME_NS * n / 2.0 * 3.0;
    (fill + scan + hammer_time_ns) / 1e6
}

/// Counts of an exploit run. Always available, even if no attack succeeded.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Summary {
    /// Number of attacks evaluated
    pub total_attacks: usize,
    /// Memory covered by all attacks in KiB
    pub total_kib: u64,
    /// Attacks with at least one exploitable page
    pub successful_attacks: usize,
    /// `successful_attacks / total_attacks`
    pub success_proportion: f64,
    /// Exploitable pages over all attacks
    pub exploitable_pages: usize,
}

/// Success statistics of an exploit run with at least one successful attack.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Statistics {
    /// The underlying counts
    #[serde(flatten)]
    pub summary: Summary,
    /// Contiguous memory needed to expect one successful attack, in KiB
    pub min_contiguous_kib: u64,
    /// Mean number of attacks until one succeeds
    pub mean_attacks: f64,
    /// Mean time until an attack succeeds, in seconds
    pub mean_time_s: f64,
    /// Duration of one attack in milliseconds
    pub attack_time_ms: f64,
}

impl Display for Summary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} total attacks (over {} KiB), of which {} successful ({:5.1} %)",
            self.total_attacks,
            self.total_kib,
            self.successful_attacks,
            100.0 * self.success_proportion
        )?;
        write!(f, "{} exploitable pages found", self.exploitable_pages)
    }
}

impl Display for Statistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        writeln!(
            f,
            "Minimum (contiguous) memory required: {} KiB",
            self.min_contiguous_kib
        )?;
        writeln!(
            f,
            "Mean number of attacks until successful: {:.1}",
            self.mean_attacks
        )?;
        write!(
            f,
            "Mean time to successful attack: {:.1} seconds (assuming {:.1}ms/attack)",
            self.mean_time_s, self.attack_time_ms
        )
    }
}

/// Estimates exploit success from a fliptable.
///
/// Ties a fliptable, the memory layout it was profiled on and the measured hammering time
/// together. [`FliptableEstimator::run_exploit`] evaluates an [`ExploitModel`] on every
/// attack; [`FliptableEstimator::statistics`] aggregates the outcome.
///
/// All attacks are assumed to hammer the same number of targets; the attack duration is
/// derived from the first attack.
pub struct FliptableEstimator {
    fliptable: Fliptable,
    layout: MemoryLayout,
    attack_time_ms: f64,
    page_size: NonZeroU64,
    results: Vec<Vec<u64>>,
    progress: Option<MultiProgress>,
}

impl FliptableEstimator {
    /// Creates a new estimator.
    ///
    /// # Arguments
    ///
    /// * `fliptable` - The profiled attacks
    /// * `layout` - DRAM layout of the profiled system
    /// * `hammer_time_ns` - Measured hammering time of one attack in nanoseconds
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyFliptable`] if `fliptable` has no attacks and
    /// [`Error::InvalidInput`] if the configured page size is zero.
    pub fn new(fliptable: Fliptable, layout: MemoryLayout, hammer_time_ns: f64) -> Result<Self> {
        let Some(first) = fliptable.attacks().first() else {
            return Err(Error::EmptyFliptable);
        };
        let target_count = first.targets.len();
        if fliptable
            .iter()
            .any(|atk| atk.targets.len() != target_count)
        {
            warn!(
                "Attacks hammer different numbers of targets, assuming {} for the attack time",
                target_count
            );
        }
        let attack_time_ms = compute_attack_time(target_count, hammer_time_ns);
        let page_size =
            NonZeroU64::new(PAGE_SIZE).ok_or(Error::InvalidInput("page size must not be zero"))?;
        debug!("attack time: {:.3} ms", attack_time_ms);
        Ok(FliptableEstimator {
            fliptable,
            layout,
            attack_time_ms,
            page_size,
            results: vec![],
            progress: None,
        })
    }

    /// Shows a progress bar while running exploits.
    pub fn with_progress(mut self, progress: MultiProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Returns the duration of one attack in milliseconds.
    pub fn attack_time_ms(&self) -> f64 {
        self.attack_time_ms
    }

    /// Returns the fliptable under evaluation.
    pub fn fliptable(&self) -> &Fliptable {
        &self.fliptable
    }

    /// Iterates the victim pages of every attack, in table order.
    pub fn iter_attacks(&self) -> impl Iterator<Item = Vec<VictimPage>> + '_ {
        self.fliptable
            .iter()
            .map(|atk| map_attack(atk, &self.layout, self.page_size))
    }

    /// Evaluates `model` on every attack and stores the exploitable frames per attack.
    /// Replaces the results of a previous run.
    pub fn run_exploit<M: ExploitModel + ?Sized>(&mut self, model: &M) {
        info!("Running exploit model on {} attacks", self.fliptable.len());
        let progress = self.progress.as_ref().map(|p| {
            let p = p.add(ProgressBar::new(self.fliptable.len() as u64));
            p.set_style(ProgressStyle::named_bar("Mapping attacks"));
            p
        });
        let attacks: Vec<Vec<VictimPage>> = self
            .iter_attacks()
            .inspect(|_| {
                if let Some(p) = &progress {
                    p.inc(1);
                }
            })
            .collect();
        self.results = model.check_attacks(&attacks);
        if let Some(p) = progress {
            p.finish_and_clear();
        }
        debug!(
            "{} of {} attacks successful",
            self.results.iter().filter(|r| !r.is_empty()).count(),
            self.results.len()
        );
    }

    /// Returns the exploitable frame numbers per attack of the last run.
    pub fn results(&self) -> &[Vec<u64>] {
        &self.results
    }

    /// Discards the results of the last run.
    pub fn clear(&mut self) {
        self.results.clear();
    }

    /// Returns the counts of the last run.
    pub fn summary(&self) -> Summary {
        let total_attacks = self.results.len();
        let successful_attacks = self.results.iter().filter(|r| !r.is_empty()).count();
        let exploitable_pages = self.results.iter().map(|r| r.len()).sum();
        let success_proportion = if total_attacks == 0 {
            0.0
        } else {
            successful_attacks as f64 / total_attacks as f64
        };
        Summary {
            total_attacks,
            total_kib: total_attacks as u64 * ATTACK_KIB,
            successful_attacks,
            success_proportion,
            exploitable_pages,
        }
    }

    /// Aggregates the success statistics of the last run.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoSuccessfulAttacks`] if no attack succeeded, including when no
    /// exploit has been run.
    pub fn statistics(&self) -> Result<Statistics> {
        let summary = self.summary();
        if summary.successful_attacks == 0 {
            return Err(Error::NoSuccessfulAttacks);
        }
        let mean_attacks = 1.0 / summary.success_proportion;
        Ok(Statistics {
            summary,
            min_contiguous_kib: mean_attacks.ceil() as u64 * ATTACK_KIB,
            mean_attacks,
            mean_time_s: mean_attacks * self.attack_time_ms / 1000.0,
            attack_time_ms: self.attack_time_ms,
        })
    }
}
