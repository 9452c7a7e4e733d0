//! seqring-inspect - read-only view of a live file-backed ring
//!
//! Attaches to the region a session created with `--region` and prints
//! its counters. The view is lock-free, so counters may be mutually torn
//! while units are running.
//!
//! Usage:
//!   seqring-inspect <REGION> [--slots] [--watch <MS>]

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use seqring::core::{Region, Summary};
use seqring::{RelayError, Result};

const USAGE: &str = "\
Usage: seqring-inspect <REGION> [OPTIONS]

Options:
      --slots        Also list occupied slots
      --watch <MS>   Re-print every MS milliseconds until the region disappears
  -h, --help         Show this help";

struct InspectConfig {
    region: PathBuf,
    slots: bool,
    watch: Option<Duration>,
}

fn parse_args() -> Result<Option<InspectConfig>> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut region = None;
    let mut slots = false;
    let mut watch = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--slots" => slots = true,
            "--watch" => {
                i += 1;
                let ms: u64 = args.get(i).and_then(|v| v.parse().ok()).ok_or_else(|| {
                    RelayError::InvalidArgument("--watch expects milliseconds".into())
                })?;
                watch = Some(Duration::from_millis(ms));
            }
            "--help" | "-h" => return Ok(None),
            other if other.starts_with('-') => {
                return Err(RelayError::InvalidArgument(format!(
                    "unknown option {:?}",
                    other
                )))
            }
            path => region = Some(PathBuf::from(path)),
        }
        i += 1;
    }

    let region =
        region.ok_or_else(|| RelayError::InvalidArgument("a region path is required".into()))?;
    Ok(Some(InspectConfig {
        region,
        slots,
        watch,
    }))
}

fn print_once(config: &InspectConfig) -> Result<()> {
    let region = Region::attach(&config.region)?;
    let header = region.snapshot();

    if let Err(violation) = header.check_invariants() {
        warn!(?violation, "snapshot is torn or the block is inconsistent");
    }

    println!("{}", Summary::from_header(&header, region.byte_len()));
    println!("- Next source offset:       {}", header.next_source_offset);
    println!("- Next seq to output:       {}", header.next_expected_seq);
    println!(
        "- Cursors (write / read):   {} / {}",
        header.write_cursor, header.read_cursor
    );

    if config.slots {
        for (index, slot) in region.slots().iter().enumerate() {
            if slot.is_occupied() {
                println!(
                    "  slot {:>4}: seq {:>8} value 0x{:02x} inserted {} ns",
                    index, slot.seq, slot.value, slot.timestamp
                );
            }
        }
    }

    // Attached regions are never removed by us
    region.release()?;
    Ok(())
}

fn run(config: InspectConfig) -> Result<()> {
    print_once(&config)?;
    let Some(interval) = config.watch else {
        return Ok(());
    };
    loop {
        thread::sleep(interval);
        println!();
        match print_once(&config) {
            Ok(()) => {}
            Err(RelayError::AttachFailure { reason }) => {
                println!("region gone ({}), stopping", reason);
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

fn main() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match parse_args() {
        Ok(Some(config)) => config,
        Ok(None) => {
            println!("{}", USAGE);
            return;
        }
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
