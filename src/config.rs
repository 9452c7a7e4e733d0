//! Session configuration and command-line parsing

use std::path::PathBuf;
use std::time::Duration;

use crate::core::{DEFAULT_BACKOFF, DEFAULT_DRAIN_POLL};
use crate::error::{RelayError, Result};
use crate::unit::Pacing;

pub const USAGE: &str = "\
seqring - order-preserving byte relay over a bounded shared ring

Usage: seqring --source <PATH> [OPTIONS]

Options:
  -s, --source <PATH>        File to relay (required)
  -o, --output <PATH>        Output file (default: output.txt)
  -c, --capacity <N>         Ring slots (default: 16)
  -k, --key <N>              XOR key, decimal or 0x-hex (default: 0x2A)
  -p, --producers <N>        Producer threads (default: 1)
  -r, --consumers <N>        Consumer threads (default: 1)
  -m, --mode <MODE>          Pacing for every unit: burst | auto | manual | <ms>
      --producer-mode <MODE> Pacing for producers only
      --consumer-mode <MODE> Pacing for consumers only
      --backoff <MS>         Flush turn-check interval (default: 50)
      --drain-poll <MS>      Teardown drain sampling interval (default: 100)
      --region <PATH>        Back the ring with a file other processes can inspect
      --auto-teardown        Tear down once producers finish and output is complete
  -h, --help                 Show this help";

/// Everything a session runner needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub capacity: usize,
    pub key: u8,
    pub source: PathBuf,
    pub output: PathBuf,
    pub producers: usize,
    pub consumers: usize,
    pub producer_pacing: Pacing,
    pub consumer_pacing: Pacing,
    pub flush_backoff: Duration,
    pub drain_poll: Duration,
    pub region: Option<PathBuf>,
    pub auto_teardown: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            key: 0x2A,
            source: PathBuf::new(),
            output: PathBuf::from("output.txt"),
            producers: 1,
            consumers: 1,
            producer_pacing: Pacing::Immediate,
            consumer_pacing: Pacing::Immediate,
            flush_backoff: DEFAULT_BACKOFF,
            drain_poll: DEFAULT_DRAIN_POLL,
            region: None,
            auto_teardown: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source.as_os_str().is_empty() {
            return Err(RelayError::InvalidArgument("--source is required".into()));
        }
        if self.capacity == 0 || self.capacity > i32::MAX as usize {
            return Err(RelayError::InvalidArgument(format!(
                "capacity must be between 1 and {}",
                i32::MAX
            )));
        }
        if self.producers == 0 || self.consumers == 0 {
            return Err(RelayError::InvalidArgument(
                "at least one producer and one consumer are required".into(),
            ));
        }
        Ok(())
    }
}

/// What the command line asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(SessionConfig),
    Help,
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RelayError::InvalidArgument(format!("{} expects a number, got {:?}", flag, value)))
}

fn parse_key(value: &str) -> Result<u8> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    };
    parsed.ok_or_else(|| {
        RelayError::InvalidArgument(format!("--key expects 0..=255, got {:?}", value))
    })
}

fn parse_pacing(flag: &str, value: &str) -> Result<Pacing> {
    Pacing::parse(value).ok_or_else(|| {
        RelayError::InvalidArgument(format!(
            "{} expects burst, auto, manual or milliseconds, got {:?}",
            flag, value
        ))
    })
}

/// Parse flags (program name already stripped).
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Command> {
    let args: Vec<String> = args.into_iter().collect();
    let mut config = SessionConfig::default();

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = || -> Result<&str> {
            i += 1;
            args.get(i)
                .map(String::as_str)
                .ok_or_else(|| RelayError::InvalidArgument(format!("{} needs a value", flag)))
        };

        match flag {
            "--source" | "-s" => config.source = PathBuf::from(value()?),
            "--output" | "-o" => config.output = PathBuf::from(value()?),
            "--capacity" | "-c" => config.capacity = parse_number(flag, value()?)?,
            "--key" | "-k" => config.key = parse_key(value()?)?,
            "--producers" | "-p" => config.producers = parse_number(flag, value()?)?,
            "--consumers" | "-r" => config.consumers = parse_number(flag, value()?)?,
            "--mode" | "-m" => {
                let pacing = parse_pacing(flag, value()?)?;
                config.producer_pacing = pacing;
                config.consumer_pacing = pacing;
            }
            "--producer-mode" => config.producer_pacing = parse_pacing(flag, value()?)?,
            "--consumer-mode" => config.consumer_pacing = parse_pacing(flag, value()?)?,
            "--backoff" => {
                config.flush_backoff = Duration::from_millis(parse_number(flag, value()?)?)
            }
            "--drain-poll" => {
                config.drain_poll = Duration::from_millis(parse_number(flag, value()?)?)
            }
            "--region" => config.region = Some(PathBuf::from(value()?)),
            "--auto-teardown" => config.auto_teardown = true,
            "--help" | "-h" => return Ok(Command::Help),
            other => {
                return Err(RelayError::InvalidArgument(format!(
                    "unknown option {:?}",
                    other
                )))
            }
        }
        i += 1;
    }

    config.validate()?;
    Ok(Command::Run(config))
}
