//! seqring session runner
//!
//! Spawns producers over `--source` and consumers appending to `--output`,
//! then tears the ring down on ENTER (or by itself with `--auto-teardown`).
//!
//! Usage:
//!   cargo run --release -- --source input.txt [OPTIONS]
//!   RUST_LOG=seqring=debug cargo run -- --source input.txt -m auto

use tracing_subscriber::EnvFilter;

use seqring::config::{parse_args, Command, SessionConfig, USAGE};
use seqring::Result;

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run_session(config: SessionConfig) -> Result<()> {
    println!("SEQRING - shared ring relay");
    println!("===========================");
    println!("Source:     {}", config.source.display());
    println!("Output:     {}", config.output.display());
    println!("Capacity:   {} slots", config.capacity);
    println!(
        "Units:      {} producer(s), {} consumer(s)",
        config.producers, config.consumers
    );
    if let Some(region) = &config.region {
        println!("Region:     {} (attach with seqring-inspect)", region.display());
    }
    println!();

    let report = seqring::run(&config)?;

    println!("\n{}", report.summary);
    if report.failed_units > 0 {
        println!("Units that failed: {}", report.failed_units);
    }
    Ok(())
}

fn main() {
    init_logging();

    let config = match parse_args(std::env::args().skip(1)) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return;
        }
        Err(e) => {
            eprintln!("error: {}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run_session(config) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
