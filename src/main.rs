//! qstore: sparse quantum-set memory devices
//!
//! Usage:
//!   qstore info     --config qstore.toml
//!   qstore exercise --config qstore.toml --device 0 --offset 0 --bytes 6000 [--json]

use std::io::{Read, SeekFrom, Write};
use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use qstore::storage::{AllocStats, ConfiguredAllocator, PageAllocator, SlabCache, VmallocAllocator};
use qstore::storage::{PAGE_SHIFT, PAGE_SIZE};
use qstore::{AccessMode, BackendKind, Config, DeviceRegistry, DeviceStats, MapRegion, StorageError};

/// Address the exercise mapping pretends to live at.
const MAP_BASE: usize = 0x1000_0000;

#[derive(Parser)]
#[command(name = "qstore", about = "Sparse quantum-set memory devices", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the backend and device geometry described by a configuration.
    Info {
        /// Path to the TOML configuration file (built-in defaults if omitted).
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a pattern to a device, read it back, map it and fault it in.
    Exercise {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Device minor number.
        #[arg(long, default_value_t = 0)]
        device: usize,
        /// Byte offset to start writing at.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Number of bytes to write.
        #[arg(long, default_value_t = 6000)]
        bytes: usize,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

struct ExerciseArgs {
    device: usize,
    offset: u64,
    bytes: usize,
    json: bool,
}

#[derive(Serialize)]
struct ExerciseReport {
    device: DeviceStats,
    written: usize,
    pages_faulted: usize,
    allocator: AllocStats,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Info { config } => run_info(&load_config(config)?),
        Command::Exercise { config, device, offset, bytes, json } => {
            let cfg = load_config(config)?;
            let args = ExerciseArgs { device, offset, bytes, json };
            match cfg.backend.kind {
                BackendKind::Slab => run_exercise::<SlabCache>(&cfg, &args),
                BackendKind::Pages => run_exercise::<PageAllocator>(&cfg, &args),
                BackendKind::Vmalloc => run_exercise::<VmallocAllocator>(&cfg, &args),
            }
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn run_info(cfg: &Config) -> anyhow::Result<()> {
    let tunables = cfg.tunables();
    let quantum = match cfg.backend.kind {
        BackendKind::Slab => cfg.backend.quantum,
        BackendKind::Pages | BackendKind::Vmalloc => PAGE_SIZE << tunables.order,
    };
    println!("=== qstore ===");
    println!("Backend     : {}", cfg.backend.kind);
    println!("Devices     : {}", cfg.devices.count);
    println!("Quantum     : {} bytes (order {})", quantum, tunables.order);
    println!("Quantum set : {} quanta ({} bytes per set)", tunables.qset, quantum * tunables.qset);
    match cfg.memory_limit() {
        Some(limit) => println!("Memory cap  : {} MB", limit / 1_048_576),
        None => println!("Memory cap  : unlimited"),
    }
    Ok(())
}

fn run_exercise<A: ConfiguredAllocator>(cfg: &Config, args: &ExerciseArgs) -> anyhow::Result<()> {
    ensure!(args.bytes > 0, "--bytes must be > 0");
    let registry = DeviceRegistry::<A>::from_config(cfg)?;

    let pattern: Vec<u8> = (0..args.bytes).map(|i| (i % 251) as u8).collect();
    let mut session = registry.open(args.device, AccessMode::ReadWrite)?;
    session.seek(SeekFrom::Start(args.offset))?;
    session.write_all(&pattern).context("writing pattern")?;

    session.seek(SeekFrom::Start(args.offset))?;
    let mut readback = vec![0u8; args.bytes];
    session.read_exact(&mut readback).context("reading pattern back")?;
    ensure!(readback == pattern, "read-back does not match the written pattern");
    info!(device = args.device, offset = args.offset, bytes = args.bytes, "Pattern verified");

    let device = registry.device(args.device)?;
    let first_page = args.offset >> PAGE_SHIFT;
    let end = args.offset + args.bytes as u64;
    let pages = usize::try_from(((end - 1) >> PAGE_SHIFT) - first_page + 1)?;
    let region = MapRegion::new(MAP_BASE, pages * PAGE_SIZE, first_page)?;

    let mut pages_faulted = 0;
    match device.map(region) {
        Ok(mapping) => {
            for i in 0..pages {
                let page = mapping.fault(MAP_BASE + i * PAGE_SIZE)?;
                let page_start = (first_page + i as u64) * PAGE_SIZE as u64;
                let lo = page_start.max(args.offset);
                let hi = (page_start + PAGE_SIZE as u64).min(end);
                let in_page = (lo - page_start) as usize..(hi - page_start) as usize;
                let in_pattern = (lo - args.offset) as usize..(hi - args.offset) as usize;
                let matches = page.read(|bytes| bytes[in_page] == pattern[in_pattern]);
                ensure!(matches, "mapped page {i} does not match the written pattern");
                pages_faulted += 1;
            }
            info!(device = args.device, pages = pages_faulted, "Mapped pages verified");
        }
        Err(StorageError::Unsupported(reason)) => {
            info!(device = args.device, %reason, "Mapping skipped");
        }
        Err(e) => return Err(e.into()),
    }

    let report = ExerciseReport {
        device: device.stats(),
        written: args.bytes,
        pages_faulted,
        allocator: registry.alloc_stats(),
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.device);
        println!(
            "written {} bytes, faulted {} page(s), {} quanta live ({} bytes)",
            report.written,
            report.pages_faulted,
            report.allocator.live(),
            report.allocator.live_bytes
        );
    }

    registry.shutdown();
    Ok(())
}
