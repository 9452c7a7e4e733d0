//! # seqring
//!
//! Order-preserving byte relay over a bounded shared ring.
//!
//! Producers claim source offsets, encode bytes and push them into a
//! fixed-capacity ring. Consumers pull in whatever order the ring hands
//! them out, then wait for each byte's turn so the output reproduces the
//! source exactly. All shared state lives in one memory-mapped control
//! block guarded by one lock.

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod session;
pub mod unit;

pub use error::{RelayError, Result};
pub use session::{run, Session, SessionReport};
