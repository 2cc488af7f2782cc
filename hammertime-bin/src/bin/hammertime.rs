use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use hammertime_bin::init_logging_with_progress;
use hammertime_core::estimator::{AnyFlip, BitTarget, ExploitModel, FliptableEstimator, Statistics};
use hammertime_core::fliptable::Fliptable;
use hammertime_core::memory::{DRAMAddr, MemoryLayout};
use indicatif::MultiProgress;
use log::{info, warn};
use serde::Serialize;

/// Rowhammer fliptable analysis.
#[derive(Debug, Parser)]
#[clap(version, about)]
struct CliArgs {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Estimate exploit success from a fliptable.
    Estimate(EstimateArgs),
    /// Compare two fliptables by target rows.
    Diff(DiffArgs),
    /// Translate between physical and DRAM addresses.
    Translate(TranslateArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum ModelKind {
    /// Every flipped page is exploitable
    Any,
    /// A page is exploitable if a flip hits `--mask` at `--byte-offset`
    Bit,
}

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
enum Direction {
    /// 0→1
    Up,
    /// 1→0
    Down,
}

#[derive(Debug, clap::Args, Serialize, Clone)]
struct EstimateArgs {
    /// The memory layout file (JSON or binary record).
    #[clap(long = "layout")]
    layout: Option<PathBuf>,
    /// The fliptable report.
    #[clap(long = "fliptable")]
    fliptable: PathBuf,
    /// Measured hammering time per attack in nanoseconds.
    #[clap(long = "hammer-time-ns")]
    hammer_time_ns: f64,
    /// The exploit model.
    #[clap(long = "model", value_enum, default_value = "any")]
    model: ModelKind,
    /// Byte offset within the page (model `bit`).
    #[clap(long = "byte-offset", default_value = "0")]
    byte_offset: u64,
    /// Bit mask at the byte offset (model `bit`), e.g. `0x04`.
    #[clap(long = "mask", default_value = "0xff", value_parser = parse_u8)]
    mask: u8,
    /// Required flip direction (model `bit`).
    #[clap(long = "direction", value_enum, default_value = "up")]
    direction: Direction,
    /// Output file for results (JSON format).
    #[clap(long = "output")]
    output: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
struct DiffArgs {
    /// The left fliptable.
    left: PathBuf,
    /// The right fliptable.
    right: PathBuf,
    /// Write `left_only.txt`, `common.txt` and `right_only.txt` to this directory.
    #[clap(long = "output-dir")]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Args)]
struct TranslateArgs {
    /// The memory layout file (JSON or binary record).
    #[clap(long = "layout")]
    layout: Option<PathBuf>,
    /// A physical address in hex (`0x...`) or a DRAM address (`b01.r000100.c0000`).
    addr: String,
}

#[derive(Debug, Serialize)]
struct EstimateResults {
    timestamp: String,
    args: EstimateArgs,
    layout: String,
    statistics: Statistics,
}

fn parse_u8(s: &str) -> Result<u8, std::num::ParseIntError> {
    match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

fn load_layout(path: Option<&Path>) -> Result<MemoryLayout> {
    let layout = match path {
        Some(path) => MemoryLayout::load_file(path)
            .with_context(|| format!("loading layout {}", path.display()))?,
        None => {
            warn!("No layout given, using the default layout");
            MemoryLayout::default()
        }
    };
    info!("Memory layout: {}", layout);
    Ok(layout)
}

fn load_fliptable(path: &Path) -> Result<Fliptable> {
    Fliptable::load_file(path).with_context(|| format!("loading fliptable {}", path.display()))
}

fn estimate(args: EstimateArgs, progress: MultiProgress) -> Result<()> {
    let layout = load_layout(args.layout.as_deref())?;
    let fliptable = load_fliptable(&args.fliptable)?;
    if let Some(params) = fliptable.params() {
        info!("Hammering parameters: {:?}", params.entries);
    }
    let model: Box<dyn ExploitModel> = match args.model {
        ModelKind::Any => Box::new(AnyFlip),
        ModelKind::Bit => Box::new(BitTarget {
            byte_offset: args.byte_offset,
            mask: args.mask,
            pullup: matches!(args.direction, Direction::Up),
        }),
    };
    let mut estimator =
        FliptableEstimator::new(fliptable, layout, args.hammer_time_ns)?.with_progress(progress);
    estimator.run_exploit(model.as_ref());
    let statistics = match estimator.statistics() {
        Ok(statistics) => statistics,
        Err(e) => {
            println!("{}", estimator.summary());
            bail!(e);
        }
    };
    println!("{}", statistics);

    if let Some(output) = &args.output {
        let results = EstimateResults {
            timestamp: chrono::Local::now().to_rfc3339(),
            args: args.clone(),
            layout: layout.to_string(),
            statistics,
        };
        let file = File::create(output)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &results)?;
        writer.flush()?;
        info!("Results saved to {}", output.display());
    }
    Ok(())
}

fn diff(args: DiffArgs) -> Result<()> {
    let mut left = load_fliptable(&args.left)?;
    let mut right = load_fliptable(&args.right)?;
    left.sort_by_targets();
    right.sort_by_targets();
    let diff = left.diff(&right)?;
    println!("{} attacks only in {}", diff.self_only.len(), args.left.display());
    println!("{} attacks in both", diff.common.len());
    println!("{} attacks only in {}", diff.other_only.len(), args.right.display());
    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir)?;
        for (name, table) in [
            ("left_only.txt", &diff.self_only),
            ("common.txt", &diff.common),
            ("right_only.txt", &diff.other_only),
        ] {
            table.save_file(dir.join(name))?;
        }
        info!("Diff tables saved to {}", dir.display());
    }
    Ok(())
}

fn translate(args: TranslateArgs) -> Result<()> {
    let layout = load_layout(args.layout.as_deref())?;
    if let Some(hex) = args.addr.strip_prefix("0x") {
        let phys = u64::from_str_radix(hex, 16)
            .with_context(|| format!("invalid physical address {}", args.addr))?;
        println!("{:#x} -> {}", phys, layout.phys_to_dram(phys));
    } else {
        let dram: DRAMAddr = args.addr.parse()?;
        println!("{} -> {:#x}", dram, layout.dram_to_phys(&dram));
    }
    Ok(())
}

fn main() -> Result<()> {
    let progress = init_logging_with_progress()?;
    let args = CliArgs::parse();
    info!("CLI args: {:?}", args);
    match args.command {
        Command::Estimate(args) => estimate(args, progress),
        Command::Diff(args) => diff(args),
        Command::Translate(args) => translate(args),
    }
}
