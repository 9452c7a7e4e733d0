//! Per-item pacing
//!
//! A unit either waits for an operator step after each item, sleeps a
//! fixed delay, or runs flat out. Manual steps come from an
//! [`OperatorConsole`](super::OperatorConsole); units never read stdin
//! themselves.

use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::core::Semaphore;
use crate::error::{RelayError, Result};

/// Delay of the automatic mode.
pub const AUTO_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pacing {
    #[default]
    Immediate,
    Interval(Duration),
    /// Wait for one operator step per item.
    Manual,
}

impl Pacing {
    /// Pause after one item.
    ///
    /// `Manual` takes one permit from `steps`; a closed step source turns
    /// into `ResourceGone` so parked units stop with everyone else.
    pub fn pause(&self, steps: Option<&Semaphore>) -> Result<()> {
        match self {
            Pacing::Immediate => Ok(()),
            Pacing::Interval(d) => {
                thread::sleep(*d);
                Ok(())
            }
            Pacing::Manual => match steps {
                Some(steps) => {
                    debug!("waiting for an operator step");
                    steps.acquire()
                }
                None => Err(RelayError::InvalidArgument(
                    "manual pacing needs an operator console".into(),
                )),
            },
        }
    }

    /// `burst`, `auto`, `manual`, or a millisecond count.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "burst" | "immediate" => Some(Pacing::Immediate),
            "auto" => Some(Pacing::Interval(AUTO_INTERVAL)),
            "manual" => Some(Pacing::Manual),
            ms => ms
                .parse::<u64>()
                .ok()
                .map(|ms| Pacing::Interval(Duration::from_millis(ms))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_modes() {
        assert_eq!(Pacing::parse("burst"), Some(Pacing::Immediate));
        assert_eq!(Pacing::parse("auto"), Some(Pacing::Interval(AUTO_INTERVAL)));
        assert_eq!(Pacing::parse("manual"), Some(Pacing::Manual));
        assert_eq!(
            Pacing::parse("15"),
            Some(Pacing::Interval(Duration::from_millis(15)))
        );
        assert_eq!(Pacing::parse("sometimes"), None);
    }

    #[test]
    fn test_immediate_does_not_block() {
        Pacing::Immediate.pause(None).unwrap();
        Pacing::Interval(Duration::from_millis(1)).pause(None).unwrap();
    }

    #[test]
    fn test_manual_takes_one_step() {
        let steps = Semaphore::new(1);
        Pacing::Manual.pause(Some(&steps)).unwrap();
        assert_eq!(steps.value().unwrap(), 0);
    }

    #[test]
    fn test_manual_without_steps_is_rejected() {
        assert!(matches!(
            Pacing::Manual.pause(None),
            Err(RelayError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_closing_steps_releases_parked_unit() {
        let steps = Arc::new(Semaphore::new(0));
        let parked = {
            let steps = Arc::clone(&steps);
            thread::spawn(move || Pacing::Manual.pause(Some(&steps)))
        };
        thread::sleep(Duration::from_millis(20));
        steps.close();
        assert!(parked.join().unwrap().unwrap_err().is_resource_gone());
    }
}
