//! Relay error taxonomy
//!
//! - Startup failures (create/attach) are fatal for the unit that hits them.
//! - `ResourceGone` is the normal termination signal after teardown.
//! - Output failures are reported but never stop the system.

use std::io;

use thiserror::Error;

/// Every failure an operation in this crate can surface.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The shared region or its arbitration resources could not be created.
    #[error("failed to create shared region: {0}")]
    CreationFailure(#[source] io::Error),

    /// An existing shared region could not be joined.
    #[error("failed to attach shared region: {reason}")]
    AttachFailure { reason: String },

    /// The control block or arbitration primitive has been destroyed.
    #[error("shared resources have been released")]
    ResourceGone,

    /// The source collaborator failed at a specific offset.
    #[error("failed to read source at offset {offset}: {source}")]
    SourceRead {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// The output collaborator rejected an append.
    #[error("failed to append to output: {0}")]
    OutputWriteFailure(#[source] io::Error),

    /// A flush was attempted for a seq that already reached the output.
    #[error("seq {seq} already flushed (next expected {next_expected})")]
    AlreadyFlushed { seq: u64, next_expected: u64 },

    /// A command-line flag or configuration value was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RelayError {
    /// True for the one condition every unit loop absorbs as clean shutdown.
    #[inline(always)]
    pub fn is_resource_gone(&self) -> bool {
        matches!(self, Self::ResourceGone)
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
