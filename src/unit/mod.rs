//! Producer and consumer units plus the collaborators they talk to.
//!
//! A unit is an independent thread coordinated only through the shared
//! control block and its arbitration primitive.

mod console;
mod consumer;
mod pacing;
mod producer;
mod sink;
mod source;

pub use console::OperatorConsole;
pub use consumer::{Consumer, ConsumerReport};
pub use pacing::{Pacing, AUTO_INTERVAL};
pub use producer::{Producer, ProducerReport, UnitExit};
pub use sink::{FileSink, MemorySink, OutputSink};
pub use source::{ByteSource, FileSource, MemorySource};
