//! Thin, `unsafe`-isolating wrappers around the raw libc calls the scheduler
//! needs: fork/exec, stop/continue/kill signals, pipes, and the
//! self-pipe plumbing used to take `SIGALRM`/`SIGCHLD` handling out of
//! signal-handler context.
//!
//! Follows the shape used throughout the teacher's own userspace code (see
//! `inttest/src/util.rs`'s `chmod`/`fchmod`/`mkfifo`): call the raw
//! function inside an `unsafe` block, check its return value, and map a
//! negative result to `io::Error::last_os_error()`.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

/// Child-status change reported by [`wait_nonblocking`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Exited(libc::c_int),
    Signaled(libc::c_int),
    Stopped,
}

/// Forks the current process.
///
/// Returns `Ok(0)` in the child, `Ok(child_pid)` in the parent.
pub fn fork() -> io::Result<libc::pid_t> {
    let res = unsafe { libc::fork() };
    if res >= 0 {
        Ok(res)
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Self-stops the calling process, as a child does right after `fork`
/// and before replacing its image (see the handshake barrier in §5).
pub fn raise_stop() -> io::Result<()> {
    let res = unsafe { libc::raise(libc::SIGSTOP) };
    if res == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Replaces the calling process's image with `executable`, passing
/// `argv = [executable]` and an empty environment. Only returns on error,
/// per `execve`'s contract.
pub fn execve_bare(executable: &str) -> io::Error {
    let path = match CString::new(executable) {
        Ok(p) => p,
        Err(_) => return io::Error::from(io::ErrorKind::InvalidInput),
    };
    let argv = [path.as_ptr(), std::ptr::null()];
    let envp: [*const libc::c_char; 1] = [std::ptr::null()];
    unsafe {
        libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }
    io::Error::last_os_error()
}

/// As [`execve_bare`], but with extra argv entries appended after
/// `executable` (used to pass the shell its pipe-fd arguments).
pub fn execve_with_argv(executable: &str, extra: &[String]) -> io::Error {
    let path = match CString::new(executable) {
        Ok(p) => p,
        Err(_) => return io::Error::from(io::ErrorKind::InvalidInput),
    };
    let extra_c: Result<Vec<CString>, _> = extra.iter().map(|s| CString::new(s.as_str())).collect();
    let extra_c = match extra_c {
        Ok(v) => v,
        Err(_) => return io::Error::from(io::ErrorKind::InvalidInput),
    };
    let mut argv: Vec<*const libc::c_char> = Vec::with_capacity(extra_c.len() + 2);
    argv.push(path.as_ptr());
    for arg in &extra_c {
        argv.push(arg.as_ptr());
    }
    argv.push(std::ptr::null());
    let envp: [*const libc::c_char; 1] = [std::ptr::null()];
    unsafe {
        libc::execve(path.as_ptr(), argv.as_ptr(), envp.as_ptr());
    }
    io::Error::last_os_error()
}

/// Creates an anonymous unidirectional pipe, returning `(read_fd, write_fd)`.
pub fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0; 2];
    let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if res == 0 {
        Ok((fds[0], fds[1]))
    } else {
        Err(io::Error::last_os_error())
    }
}

pub fn close(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

/// Delivers `signal` to `pid`.
pub fn kill(pid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    let res = unsafe { libc::kill(pid, signal) };
    if res == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Non-blocking, single-step `waitpid(-1, ..., WUNTRACED | WNOHANG)`.
///
/// Returns `Ok(None)` when no child has a pending status change. Callers
/// drain this in a loop (see §4.2's drain semantics) because multiple
/// `SIGCHLD`s can coalesce into a single wakeup.
pub fn wait_nonblocking() -> io::Result<Option<(libc::pid_t, WaitStatus)>> {
    let mut status: libc::c_int = 0;
    let pid = unsafe { libc::waitpid(-1, &mut status, libc::WUNTRACED | libc::WNOHANG) };
    if pid == 0 {
        return Ok(None);
    }
    if pid < 0 {
        let err = io::Error::last_os_error();
        // ECHILD means "no children left to wait for", not a failure of
        // the call, just nothing more to drain.
        if err.raw_os_error() == Some(libc::ECHILD) {
            return Ok(None);
        }
        return Err(err);
    }
    let decoded = if libc::WIFEXITED(status) {
        WaitStatus::Exited(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        WaitStatus::Signaled(libc::WTERMSIG(status))
    } else {
        // WUNTRACED guarantees WIFSTOPPED is the only remaining case.
        WaitStatus::Stopped
    };
    Ok(Some((pid, decoded)))
}

/// Blocks until `pid` reports itself stopped. Used only for the startup
/// handshake barrier (§5), before any signal handler is installed, so a
/// blocking `waitpid` is exactly what's wanted: there is nothing else for
/// the main flow to do until every child has self-stopped.
pub fn wait_until_stopped(pid: libc::pid_t) -> io::Result<()> {
    let mut status: libc::c_int = 0;
    let res = unsafe { libc::waitpid(pid, &mut status, libc::WUNTRACED) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    if libc::WIFSTOPPED(status) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("child {pid} exited before reaching the startup handshake"),
        ))
    }
}

/// Ignores `SIGPIPE` so that writes after the shell disconnects surface as
/// `EPIPE` rather than terminating the process (§6).
pub fn ignore_sigpipe() -> io::Result<()> {
    install_handler(libc::SIGPIPE, libc::SIG_IGN)
}

/// Installs `handler` (a raw function pointer, e.g. `SIG_IGN` or an
/// `extern "C" fn(c_int)`) for `signal`.
pub fn install_handler(signal: libc::c_int, handler: libc::sighandler_t) -> io::Result<()> {
    let res = unsafe { libc::signal(signal, handler) };
    if res == libc::SIG_ERR {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Arms `SIGALRM` to fire once after `seconds`, per the quantum timer's
/// "rearmed at each successful dispatch" discipline (§4.3).
pub fn arm_alarm(seconds: libc::c_uint) {
    unsafe {
        libc::alarm(seconds);
    }
}

/// Writes a single byte to `fd` without blocking, as a signal handler's
/// only action (the self-pipe trick, §9). Errors (a full pipe, `EINTR`)
/// are swallowed: the reader only needs to know "something happened at
/// least once," a dropped byte when the pipe is already non-empty loses no
/// information.
pub fn self_pipe_notify(fd: RawFd) {
    let byte: u8 = 1;
    unsafe {
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
    }
}

/// Drains every pending byte from a self-pipe's read end.
pub fn self_pipe_drain(fd: RawFd) {
    let mut buf = [0u8; 64];
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n <= 0 {
            break;
        }
    }
}

/// Sets `O_NONBLOCK` on `fd`.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let res = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if res < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// Blocks until one of `fds` is readable, or forever if `timeout_ms` is
/// `None`. Returns the subset of `fds` that became readable, in the same
/// order.
pub fn poll_readable(fds: &[RawFd], timeout_ms: Option<i32>) -> io::Result<Vec<RawFd>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let timeout = timeout_ms.unwrap_or(-1);
    let res = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, timeout) };
    if res < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Vec::new());
        }
        return Err(err);
    }
    Ok(pollfds
        .iter()
        .filter(|p| p.revents & libc::POLLIN != 0)
        .map(|p| p.fd)
        .collect())
}

/// Formats a file descriptor the way `spawn_shell` passes it on argv: a
/// 5-digit, zero-padded decimal (§6).
pub fn format_fd(fd: RawFd) -> String {
    format!("{:05}", fd)
}
