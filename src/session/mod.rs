//! Interactive wallet sessions
//!
//! A session is one `zingo-cli` process attached to a pseudo-terminal.
//! The [`Transport`] trait is the seam between the byte-level process
//! plumbing and the [`Expecter`], which turns the unframed output stream
//! into matched prompts.
//!
//! ```text
//! SessionLauncher → Transport (PtySession) → Expecter → TransferSequencer
//! ```

pub mod expect;
pub mod launch;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::error::Result;

pub use expect::{ExpectOutcome, ExpectationSet, Expecter, Matched};
pub use launch::{LaunchSpec, PtyLauncher, PtySession, SessionMode};

/// Byte transport to a running wallet process
#[async_trait]
pub trait Transport: Send {
    /// Write one line of input followed by the terminal line terminator
    async fn write_line(&mut self, line: &str) -> Result<()>;

    /// Next chunk of output, `None` once the process has closed its output
    async fn read_chunk(&mut self) -> Option<Vec<u8>>;

    /// Drop output that is already buffered but not yet read
    fn discard_pending(&mut self);

    /// Stop the process, waiting up to its grace period for a clean exit
    async fn shutdown(&mut self);
}

/// Produces a fresh transport for every transfer
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    type Session: Transport + 'static;

    async fn launch(&self) -> Result<Self::Session>;
}
