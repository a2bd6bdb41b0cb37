//! `scheduler [path …]`: a userspace round-robin process scheduler.
//!
//! Each positional argument is launched as an initial LOW-priority task.
//! With no arguments the scheduler still starts (only the shell is
//! present). Exits 0 once the run queue has drained; exits 1 on startup
//! failure.

use anyhow::Context;
use scheduler::dispatcher::Dispatcher;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let initial: Vec<String> = std::env::args().skip(1).collect();
    log::info!("starting scheduler with {} initial task(s)", initial.len());

    let dispatcher =
        Dispatcher::bootstrap(&initial).context("scheduler bootstrap failed")?;
    dispatcher.run().context("scheduler event loop failed")?;

    Ok(())
}
