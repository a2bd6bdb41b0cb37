//! Wire format for requests sent by the shell process to the scheduler, and
//! for the single-integer replies sent back.
//!
//! This is treated as an external interface: the layout must match whatever
//! process is spawned as `shell` (see the scheduler crate's bootstrap), not
//! just code within this workspace. Field order, widths and the
//! `TASK_NAME_SZ` bound are fixed to match the original implementation this
//! system was distilled from, since nothing in this workspace is free to
//! change them unilaterally.

use std::io::{self, Read, Write};
use std::mem;

/// Maximum length of a task's executable path in an `EXEC_TASK` request,
/// including the NUL terminator.
pub const TASK_NAME_SZ: usize = 60;

/// Tag identifying the kind of request carried by a [`RequestRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RequestKind {
    PrintTasks = 1,
    KillTask = 2,
    ExecTask = 3,
    HighTask = 4,
    LowTask = 5,
}

impl RequestKind {
    fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => Self::PrintTasks,
            2 => Self::KillTask,
            3 => Self::ExecTask,
            4 => Self::HighTask,
            5 => Self::LowTask,
            _ => return None,
        })
    }
}

/// Reply sentinel for a request tag the scheduler does not implement.
///
/// Matches the original source's `return -ENOSYS;` in `process_request`'s
/// default arm.
pub const REPLY_NOT_IMPLEMENTED: i32 = -(libc_enosys() as i32);

// `libc::ENOSYS` is a plain `i32` constant on every target we care about;
// this wrapper exists only so the constant above can be computed at
// const-eval time without pulling `libc` into this crate's dependency list.
const fn libc_enosys() -> i32 {
    38
}

/// Fixed-size binary frame sent by the shell over the request pipe.
///
/// `#[repr(C)]` because its bytes are exchanged verbatim with a process
/// outside this workspace, not just passed between Rust functions.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RequestRecord {
    pub request_no: i32,
    pub task_arg: i32,
    pub exec_task_arg: [u8; TASK_NAME_SZ],
}

impl RequestRecord {
    pub fn print_tasks() -> Self {
        Self::new(RequestKind::PrintTasks, 0, b"")
    }

    pub fn kill_task(id: i32) -> Self {
        Self::new(RequestKind::KillTask, id, b"")
    }

    pub fn exec_task(path: &[u8]) -> Self {
        Self::new(RequestKind::ExecTask, 0, path)
    }

    pub fn high_task(id: i32) -> Self {
        Self::new(RequestKind::HighTask, id, b"")
    }

    pub fn low_task(id: i32) -> Self {
        Self::new(RequestKind::LowTask, id, b"")
    }

    fn new(kind: RequestKind, task_arg: i32, path: &[u8]) -> Self {
        let mut exec_task_arg = [0u8; TASK_NAME_SZ];
        // Truncate rather than panic: an oversized path is a caller bug, not
        // a reason to take the whole channel down.
        let len = path.len().min(TASK_NAME_SZ - 1);
        exec_task_arg[..len].copy_from_slice(&path[..len]);
        Self {
            request_no: kind as i32,
            task_arg,
            exec_task_arg,
        }
    }

    /// The request's tag, or `None` if `request_no` is not one this
    /// protocol version defines.
    pub fn kind(&self) -> Option<RequestKind> {
        RequestKind::from_raw(self.request_no)
    }

    /// The NUL-terminated path carried by an `EXEC_TASK` request, with the
    /// terminator (and anything after it) stripped.
    pub fn exec_path(&self) -> &[u8] {
        let end = self
            .exec_task_arg
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.exec_task_arg.len());
        &self.exec_task_arg[..end]
    }

    /// Reads one request record from `r`, performing a single exact-size
    /// read. A short read is reported as [`io::ErrorKind::UnexpectedEof`],
    /// which callers treat as fatal for the request loop (but not for the
    /// scheduler as a whole) per the channel's short-read contract.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; mem::size_of::<RequestRecord>()];
        r.read_exact(&mut buf)?;
        // SAFETY: `RequestRecord` is `#[repr(C)]`, contains no padding that
        // matters (all fields are plain integers/bytes) and every bit
        // pattern of its fields is valid.
        Ok(unsafe { mem::transmute::<_, RequestRecord>(buf) })
    }

    /// Writes this record to `w` as a single exact-size write.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        // SAFETY: reading `self` as its own byte representation; valid for
        // any `#[repr(C)]` struct of plain data.
        let buf = unsafe {
            mem::transmute_copy::<RequestRecord, [u8; mem::size_of::<RequestRecord>()]>(self)
        };
        w.write_all(&buf)
    }
}

/// Reads a single `i32` reply from `r`.
pub fn read_reply<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; mem::size_of::<i32>()];
    r.read_exact(&mut buf)?;
    Ok(i32::from_ne_bytes(buf))
}

/// Writes a single `i32` reply to `w`.
pub fn write_reply<W: Write>(w: &mut W, value: i32) -> io::Result<()> {
    w.write_all(&value.to_ne_bytes())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_exec_task() {
        let rec = RequestRecord::exec_task(b"/bin/true");
        let mut buf = Vec::new();
        rec.write_to(&mut buf).unwrap();
        let decoded = RequestRecord::read_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded.kind(), Some(RequestKind::ExecTask));
        assert_eq!(decoded.exec_path(), b"/bin/true");
    }

    #[test]
    fn kill_task_carries_id() {
        let rec = RequestRecord::kill_task(7);
        assert_eq!(rec.kind(), Some(RequestKind::KillTask));
        assert_eq!(rec.task_arg, 7);
    }

    #[test]
    fn unknown_tag_has_no_kind() {
        let rec = RequestRecord {
            request_no: 999,
            task_arg: 0,
            exec_task_arg: [0; TASK_NAME_SZ],
        };
        assert_eq!(rec.kind(), None);
    }

    #[test]
    fn exec_path_truncates_oversized_input() {
        let long = vec![b'a'; TASK_NAME_SZ + 10];
        let rec = RequestRecord::exec_task(&long);
        assert_eq!(rec.exec_path().len(), TASK_NAME_SZ - 1);
    }

    #[test]
    fn reply_not_implemented_matches_enosys() {
        assert_eq!(REPLY_NOT_IMPLEMENTED, -38);
    }
}
