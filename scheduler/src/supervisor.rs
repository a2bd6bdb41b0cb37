//! Spawns child processes and reaps them. Owns nothing but a monotonic id
//! counter: the `(pid -> task)` association lives in the [`RunQueue`]
//! itself (see its ownership note), so there is no second copy to keep in
//! sync.
//!
//! [`RunQueue`]: crate::runqueue::RunQueue

use crate::error::{SchedulerError, SchedulerResult};
use crate::sys::{self, WaitStatus};
use crate::task::{Task, TaskId};
use std::os::unix::io::RawFd;

pub struct Supervisor {
    next_id: TaskId,
}

impl Supervisor {
    pub fn new() -> Self {
        Self { next_id: 0 }
    }

    /// Forks and execs `executable` as a new LOW-priority task.
    ///
    /// `inherited_fds` are closed in the child before it self-stops and
    /// replaces its image: they are scheduler-internal (self-pipes, the
    /// shell's pipe ends) and must not leak into an unrelated child.
    pub fn spawn(&mut self, executable: &str, inherited_fds: &[RawFd]) -> SchedulerResult<Task> {
        let pid = sys::fork().map_err(SchedulerError::Fork)?;
        if pid == 0 {
            for &fd in inherited_fds {
                sys::close(fd);
            }
            child_stop_and_exec(executable);
        }
        let id = self.next_id;
        self.next_id += 1;
        Ok(Task::new(id, pid, executable.to_string()))
    }

    /// Forks and execs `executable` as the shell, wiring up the two pipes
    /// described in §6 and returning the parent's ends.
    ///
    /// Returns `(task, request_fd, return_fd)`: `request_fd` is read by the
    /// request channel, `return_fd` is written with replies.
    pub fn spawn_shell(
        &mut self,
        executable: &str,
        inherited_fds: &[RawFd],
    ) -> SchedulerResult<(Task, RawFd, RawFd)> {
        let (req_r, req_w) = sys::pipe().map_err(SchedulerError::Pipe)?;
        let (rep_r, rep_w) = sys::pipe().map_err(SchedulerError::Pipe)?;

        let pid = sys::fork().map_err(SchedulerError::Fork)?;
        if pid == 0 {
            for &fd in inherited_fds {
                sys::close(fd);
            }
            sys::close(req_r);
            sys::close(rep_w);
            let argv1 = sys::format_fd(req_w);
            let argv2 = sys::format_fd(rep_r);
            child_stop_and_exec_argv(executable, &[argv1, argv2]);
        }
        sys::close(req_w);
        sys::close(rep_r);

        let id = self.next_id;
        self.next_id += 1;
        Ok((Task::new(id, pid, executable.to_string()), req_r, rep_w))
    }

    /// Drains every pending child-status change (§4.2's drain semantics:
    /// multiple `SIGCHLD`s can coalesce into one wakeup, so callers must
    /// loop until the kernel reports nothing left).
    pub fn reap(&self) -> SchedulerResult<Vec<(libc::pid_t, WaitStatus)>> {
        let mut events = Vec::new();
        loop {
            match sys::wait_nonblocking().map_err(SchedulerError::Wait)? {
                Some(event) => events.push(event),
                None => break,
            }
        }
        Ok(events)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs in the child after `fork`: self-stop, then replace the image with
/// `executable` and no arguments beyond its own path. Never returns.
fn child_stop_and_exec(executable: &str) -> ! {
    child_stop_and_exec_argv(executable, &[])
}

/// As [`child_stop_and_exec`], but with extra argv entries appended after
/// `executable` (used for the shell's pipe-fd arguments).
fn child_stop_and_exec_argv(executable: &str, extra_argv: &[String]) -> ! {
    if sys::raise_stop().is_err() {
        std::process::exit(1);
    }
    if extra_argv.is_empty() {
        let err = sys::execve_bare(executable);
        log::error!("execve({executable:?}) failed: {err}");
    } else {
        let err = sys::execve_with_argv(executable, extra_argv);
        log::error!("execve({executable:?}) failed: {err}");
    }
    std::process::exit(1);
}
