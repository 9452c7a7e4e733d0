//! Operator console: the only reader of operator input
//!
//! One thread reads lines and turns them into events:
//! - manual pacing: empty line = one step for one unit, `q` = teardown
//! - otherwise: any line = teardown
//! - end of input = teardown
//!
//! With manual pacing the reader keeps handing out steps after `q`, since
//! consumers still need them to drain the ring. Steps are permits on a
//! counting resource shared with the units, so closing it after teardown
//! wakes every unit still waiting for ENTER.

use std::io;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use crate::core::{OperatorTrigger, Semaphore};
use crate::error::Result;

pub struct OperatorConsole {
    steps: Arc<Semaphore>,
    teardown: Receiver<()>,
    manual: bool,
}

impl OperatorConsole {
    /// Start the reader thread over `lines` (stdin lines in the binary).
    pub fn spawn<I>(lines: I, manual: bool) -> Result<Self>
    where
        I: IntoIterator<Item = io::Result<String>> + Send + 'static,
    {
        let steps = Arc::new(Semaphore::new(0));
        let (tx, teardown) = mpsc::channel();

        let reader_steps = Arc::clone(&steps);
        thread::Builder::new()
            .name("console".into())
            .spawn(move || {
                let mut requested = false;
                for line in lines {
                    let line = match line {
                        Ok(line) => line,
                        Err(e) => {
                            warn!(error = %e, "operator input failed");
                            break;
                        }
                    };
                    let command = line.trim();
                    if manual && command.is_empty() {
                        if reader_steps.release().is_err() {
                            break;
                        }
                        debug!("step");
                        continue;
                    }
                    if manual && !matches!(command, "q" | "quit") {
                        warn!(command, "unknown command (ENTER = next item, q = teardown)");
                        continue;
                    }
                    if !requested {
                        info!("teardown requested");
                        let _ = tx.send(());
                        requested = true;
                    }
                    if !manual {
                        break;
                    }
                }
                // Dropping the sender fires the trigger on end of input
            })?;

        if manual {
            info!("press ENTER to advance one item, q + ENTER to tear down");
        } else {
            info!("press ENTER to print the summary and release shared resources");
        }
        Ok(Self {
            steps,
            teardown,
            manual,
        })
    }

    /// Step permits for units running with manual pacing.
    pub fn steps(&self) -> Arc<Semaphore> {
        Arc::clone(&self.steps)
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Stop handing out steps; waiting units observe `ResourceGone`.
    pub fn close(&self) {
        self.steps.close();
    }
}

impl OperatorTrigger for OperatorConsole {
    fn wait(&mut self) -> io::Result<()> {
        self.teardown.wait()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn scripted(manual: bool) -> (mpsc::Sender<String>, OperatorConsole) {
        let (tx, rx) = mpsc::channel::<String>();
        let console = OperatorConsole::spawn(rx.into_iter().map(Ok), manual).unwrap();
        (tx, console)
    }

    fn wait_for_steps(steps: &Semaphore, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while steps.value().unwrap() < n {
            assert!(Instant::now() < deadline, "steps never reached {}", n);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_manual_lines_step_then_q_tears_down() {
        let (tx, mut console) = scripted(true);
        let steps = console.steps();

        tx.send(String::new()).unwrap();
        tx.send("  ".into()).unwrap();
        tx.send("what".into()).unwrap();
        wait_for_steps(&steps, 2);

        tx.send("q".into()).unwrap();
        console.wait().unwrap();
        assert_eq!(steps.value().unwrap(), 2, "unknown command is not a step");

        // Draining consumers still get their steps
        tx.send(String::new()).unwrap();
        wait_for_steps(&steps, 3);
    }

    #[test]
    fn test_any_line_tears_down_without_manual_pacing() {
        let (tx, mut console) = scripted(false);
        assert!(!console.is_manual());
        tx.send(String::new()).unwrap();
        console.wait().unwrap();
        assert_eq!(console.steps().value().unwrap(), 0);
    }

    #[test]
    fn test_end_of_input_tears_down() {
        let (tx, mut console) = scripted(true);
        drop(tx);
        console.wait().unwrap();
    }

    #[test]
    fn test_close_wakes_waiting_unit() {
        let (_tx, console) = scripted(true);
        let steps = console.steps();
        let waiting = thread::spawn(move || steps.acquire());
        thread::sleep(Duration::from_millis(20));
        console.close();
        assert!(waiting.join().unwrap().unwrap_err().is_resource_gone());
    }
}
