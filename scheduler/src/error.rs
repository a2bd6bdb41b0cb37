//! Typed, recoverable failure modes internal to the scheduler.
//!
//! Startup-fatal conditions (fork/pipe/signal-install failure at bootstrap)
//! are reported through `anyhow` directly from `main`; everything the
//! scheduler can keep running after goes through this enum instead.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("fork failed: {0}")]
    Fork(#[source] io::Error),

    #[error("waitpid failed: {0}")]
    Wait(#[source] io::Error),

    #[error("pipe creation failed: {0}")]
    Pipe(#[source] io::Error),

    #[error("request channel I/O error: {0}")]
    ChannelIo(#[source] io::Error),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
