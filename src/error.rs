//! Errors returned when starting a render loop.
//!
//! Everything else in the crate is infallible by construction: bar updates and frame
//! layout are total, and I/O failures while drawing are logged and skipped.

use std::io;

/// Failure to start the background render loop.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Another render loop already owns the terminal in this process.
    #[error("a render loop is already running in this process")]
    AlreadyRunning,

    /// The render thread could not be created.
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Convenience alias for results carrying an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
