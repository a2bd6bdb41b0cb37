//! The central state machine: owns the run queue, the task supervisor, the
//! quantum timer, and the shell's pipe pair, and drives all of it from one
//! `poll` loop.
//!
//! Per the recommended portable re-architecture, `SIGALRM` and `SIGCHLD`
//! are never handled as signals in the usual sense. Their real handlers
//! (`on_sigalrm`/`on_sigchld` below) do the one async-signal-safe thing
//! available to them: write a single byte to a self-pipe. The main flow
//! turns that into an ordinary synchronous event by polling the
//! self-pipes' read ends alongside the shell's request pipe. This is what
//! makes the "mask timer and child signals while servicing a request"
//! rule trivial: the main flow just doesn't call `poll` again until the
//! request is fully handled.

use crate::error::{SchedulerError, SchedulerResult};
use crate::runqueue::RunQueue;
use crate::supervisor::Supervisor;
use crate::sys::{self, WaitStatus};
use crate::task::TaskId;
use scheduler_protocol::{RequestKind, RequestRecord, REPLY_NOT_IMPLEMENTED};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Wall-clock quantum: a task runs for this many seconds before the
/// dispatcher preempts it. Matches the original source's `SCHED_TQ_SEC`.
pub const QUANTUM_SECONDS: libc::c_uint = 2;

/// Executable name the scheduler spawns as its control-plane partner.
pub const SHELL_EXECUTABLE: &str = "shell";

// Signal handlers carry no state of their own; the write end of each
// self-pipe is stashed here once, during bootstrap, before the handlers are
// installed.
static TICK_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
static CHILD_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_sigalrm(_: libc::c_int) {
    sys::self_pipe_notify(TICK_WRITE_FD.load(Ordering::Relaxed) as RawFd);
}

extern "C" fn on_sigchld(_: libc::c_int) {
    sys::self_pipe_notify(CHILD_WRITE_FD.load(Ordering::Relaxed) as RawFd);
}

pub struct Dispatcher {
    queue: RunQueue,
    supervisor: Supervisor,
    live_tasks: usize,

    request_fd: RawFd,
    reply_fd: RawFd,
    /// Becomes `false` on the request channel's first short read/write;
    /// from then on the scheduler runs headless (§4.4, §7).
    channel_open: bool,

    tick_read: RawFd,
    tick_write: RawFd,
    child_read: RawFd,
    child_write: RawFd,
}

impl Dispatcher {
    /// Runs the full bootstrap sequence from §4.3: spawn the shell, spawn
    /// every initial task, wait for all of them to self-stop, install the
    /// TICK/CHILD handlers, then start the head of the queue.
    pub fn bootstrap(initial: &[String]) -> SchedulerResult<Self> {
        sys::ignore_sigpipe().map_err(SchedulerError::Pipe)?;

        let (tick_read, tick_write) = sys::pipe().map_err(SchedulerError::Pipe)?;
        let (child_read, child_write) = sys::pipe().map_err(SchedulerError::Pipe)?;
        for fd in [tick_read, tick_write, child_read, child_write] {
            sys::set_nonblocking(fd).map_err(SchedulerError::Pipe)?;
        }
        TICK_WRITE_FD.store(tick_write, Ordering::Relaxed);
        CHILD_WRITE_FD.store(child_write, Ordering::Relaxed);

        let mut supervisor = Supervisor::new();
        let mut queue = RunQueue::new();

        let self_pipe_fds = [tick_read, tick_write, child_read, child_write];
        let (shell_task, request_fd, reply_fd) =
            supervisor.spawn_shell(SHELL_EXECUTABLE, &self_pipe_fds)?;
        sys::wait_until_stopped(shell_task.pid).map_err(SchedulerError::Wait)?;
        log::info!("spawned shell (pid {})", shell_task.pid);
        queue.insert(shell_task);
        let mut live_tasks = 1usize;

        let held_fds = [
            tick_read, tick_write, child_read, child_write, request_fd, reply_fd,
        ];
        for path in initial {
            match supervisor.spawn(path, &held_fds) {
                Ok(task) => {
                    sys::wait_until_stopped(task.pid).map_err(SchedulerError::Wait)?;
                    log::info!("spawned task {:?} (pid {})", path, task.pid);
                    queue.insert(task);
                    live_tasks += 1;
                }
                Err(err) => {
                    // Per-task spawn failure: log, don't insert, keep going.
                    log::error!("failed to spawn {path:?}: {err}");
                }
            }
        }

        sys::install_handler(libc::SIGALRM, on_sigalrm as usize)
            .map_err(SchedulerError::ChannelIo)?;
        sys::install_handler(libc::SIGCHLD, on_sigchld as usize)
            .map_err(SchedulerError::ChannelIo)?;

        let mut dispatcher = Self {
            queue,
            supervisor,
            live_tasks,
            request_fd,
            reply_fd,
            channel_open: true,
            tick_read,
            tick_write,
            child_read,
            child_write,
        };
        dispatcher.queue.establish_initial_cursor();
        dispatcher.dispatch_cursor()?;
        Ok(dispatcher)
    }

    /// Continues the task at the cursor and arms the quantum timer for one
    /// tick. No-op if the queue is empty (nothing left to run).
    fn dispatch_cursor(&mut self) -> SchedulerResult<()> {
        match self.queue.cursor_id() {
            Some(id) => {
                let pid = self.queue.lookup_by_id(id).map(|t| t.pid).unwrap();
                sys::kill(pid, libc::SIGCONT).map_err(SchedulerError::Wait)?;
                self.queue.mark_cursor_running();
                sys::arm_alarm(QUANTUM_SECONDS);
                log::debug!("dispatched task {id} (pid {pid})");
            }
            None => log::debug!("run queue empty, nothing to dispatch"),
        }
        Ok(())
    }

    /// `true` once every live task has been reaped and the channel is
    /// closed (the condition under which `run` returns).
    fn is_quiescent(&self) -> bool {
        self.live_tasks == 0
    }

    /// Runs the event loop to completion (§4.3 shutdown: exits once the
    /// live-task counter reaches zero).
    pub fn run(mut self) -> SchedulerResult<()> {
        loop {
            if self.is_quiescent() {
                log::info!("run queue drained, exiting");
                return Ok(());
            }
            let mut fds = vec![self.tick_read, self.child_read];
            if self.channel_open {
                fds.push(self.request_fd);
            }
            let ready = match sys::poll_readable(&fds, None) {
                Ok(r) => r,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(SchedulerError::ChannelIo(e)),
            };
            for fd in ready {
                if fd == self.tick_read {
                    sys::self_pipe_drain(self.tick_read);
                    self.on_tick()?;
                } else if fd == self.child_read {
                    sys::self_pipe_drain(self.child_read);
                    self.on_child()?;
                } else if self.channel_open && fd == self.request_fd {
                    self.service_one_request();
                }
            }
        }
    }

    /// TICK: the quantum timer fired. Stop the cursor task; the rearm
    /// happens once we observe it actually stopped (`on_child`), not here:
    /// rearming now would start the next task's quantum clock before it
    /// has even been continued.
    fn on_tick(&mut self) -> SchedulerResult<()> {
        if let Some(id) = self.queue.cursor_id() {
            let pid = self.queue.lookup_by_id(id).map(|t| t.pid).unwrap();
            log::debug!("quantum expired for task {id} (pid {pid})");
            sys::kill(pid, libc::SIGSTOP).map_err(SchedulerError::Wait)?;
        }
        Ok(())
    }

    /// CHILD: one or more child-status changes are pending; drain and
    /// handle every one (§4.2 drain semantics: SIGCHLDs coalesce).
    fn on_child(&mut self) -> SchedulerResult<()> {
        for (pid, status) in self.supervisor.reap()? {
            match status {
                WaitStatus::Exited(code) => {
                    log::info!("task pid {pid} exited with status {code}");
                    self.on_terminated(pid)?;
                }
                WaitStatus::Signaled(sig) => {
                    log::info!("task pid {pid} killed by signal {sig}");
                    self.on_terminated(pid)?;
                }
                WaitStatus::Stopped => self.on_stopped(pid)?,
            }
        }
        Ok(())
    }

    fn on_terminated(&mut self, pid: libc::pid_t) -> SchedulerResult<()> {
        let was_cursor = self.queue.cursor_id().and_then(|id| self.queue.lookup_by_id(id)).map(|t| t.pid) == Some(pid);
        if was_cursor {
            self.queue.advance(true);
            self.dispatch_cursor()?;
        } else {
            self.queue.remove_by_pid(pid);
        }
        self.live_tasks -= 1;
        Ok(())
    }

    fn on_stopped(&mut self, pid: libc::pid_t) -> SchedulerResult<()> {
        let is_cursor = self
            .queue
            .cursor_id()
            .and_then(|id| self.queue.lookup_by_id(id))
            .map(|t| t.pid)
            == Some(pid);
        if is_cursor {
            self.queue.advance(false);
            self.dispatch_cursor()?;
        }
        // Otherwise: a stop raced in from some other action; nothing to do.
        Ok(())
    }

    /// Services exactly one request record, per the request channel's
    /// three-step protocol (§4.4). Timer/child delivery is effectively
    /// masked for the duration simply because the main loop does not call
    /// `poll` again until this returns.
    fn service_one_request(&mut self) {
        let record = match RequestRecord::read_from(&mut PipeReader(self.request_fd)) {
            Ok(r) => r,
            Err(_) => {
                log::warn!("short read on request pipe, giving up on the shell channel");
                self.channel_open = false;
                return;
            }
        };
        let reply = self.handle_request(&record);
        if scheduler_protocol::write_reply(&mut PipeWriter(self.reply_fd), reply).is_err() {
            log::warn!("short write on reply pipe, giving up on the shell channel");
            self.channel_open = false;
        }
    }

    fn handle_request(&mut self, record: &RequestRecord) -> i32 {
        match record.kind() {
            Some(RequestKind::PrintTasks) => {
                self.print_tasks();
                0
            }
            Some(RequestKind::KillTask) => self.kill_task(record.task_arg as TaskId),
            Some(RequestKind::ExecTask) => {
                self.exec_task(record.exec_path());
                0
            }
            Some(RequestKind::HighTask) => {
                self.queue.promote(record.task_arg as TaskId);
                0
            }
            Some(RequestKind::LowTask) => {
                self.queue.demote(record.task_arg as TaskId);
                0
            }
            None => REPLY_NOT_IMPLEMENTED,
        }
    }

    fn print_tasks(&self) {
        for (id, pid, name, priority) in self.queue.list() {
            println!("{id}\t{pid}\t{name}\t{priority:?}");
        }
    }

    /// `KILL_TASK`: SIGKILL the task's pid; removal itself happens later,
    /// asynchronously, via the CHILD event it triggers (§4.4, §5).
    fn kill_task(&mut self, id: TaskId) -> i32 {
        match self.queue.lookup_by_id(id) {
            Some(task) => {
                let pid = task.pid;
                match sys::kill(pid, libc::SIGKILL) {
                    Ok(()) => id as i32,
                    Err(e) => {
                        log::error!("kill({pid}, SIGKILL) failed: {e}");
                        0
                    }
                }
            }
            // Unknown id: the shell may race against task termination;
            // this is a no-op acknowledgment, not an error (§7).
            None => 0,
        }
    }

    /// `EXEC_TASK`: spawn a new LOW task; it self-stops and waits for
    /// ordinary dispatch like any other task.
    fn exec_task(&mut self, path: &[u8]) {
        let path = String::from_utf8_lossy(path).into_owned();
        let held_fds = [
            self.tick_read,
            self.tick_write,
            self.child_read,
            self.child_write,
            self.request_fd,
            self.reply_fd,
        ];
        match self.supervisor.spawn(&path, &held_fds) {
            Ok(task) => {
                if let Err(e) = sys::wait_until_stopped(task.pid) {
                    log::error!("task {path:?} failed to reach the dispatch-ready state: {e}");
                    return;
                }
                log::info!("spawned task {path:?} (pid {})", task.pid);
                self.queue.insert(task);
                self.live_tasks += 1;
                // If the queue was empty before this (no tasks, only the
                // shell could have been absent only in tests), or the new
                // task just became HIGH-eligible, nothing to do here: a
                // fresh LOW task never preempts whatever is already
                // dispatched, it simply waits its turn.
            }
            Err(e) => log::error!("failed to spawn {path:?}: {e}"),
        }
    }
}

struct PipeReader(RawFd);
impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(self.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

struct PipeWriter(RawFd);
impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.0, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
