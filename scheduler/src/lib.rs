//! Library surface for the scheduler binary: the run queue, task supervisor,
//! dispatcher state machine and system-call wrappers, split out of the
//! binary crate so that `scheduler/tests/` can drive real child processes
//! through `Supervisor` and `RunQueue` directly instead of only through the
//! compiled `scheduler` binary (which needs a real `shell` partner to do
//! anything useful, and that partner is out of scope here).
//!
//! Mirrors the teacher's own `kernel`/`maestro` split ([lib] `kernel`, `[[bin]]`
//! `maestro`): the bulk of the logic lives in the library, the binary crate
//! is just the entry point.

pub mod dispatcher;
pub mod error;
pub mod runqueue;
pub mod supervisor;
pub mod sys;
pub mod task;
