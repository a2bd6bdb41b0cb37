//! Integration tests driving real child processes through [`Supervisor`] and
//! [`RunQueue`] directly, in the spirit of `inttest`'s black-box
//! process-driving tests but scoped to only what this crate owns: no real
//! `shell` binary is spawned (out of scope, see spec §1), so these exercise
//! the supervisor/run-queue pairing the way the dispatcher's handlers would,
//! without needing the full self-pipe/poll event loop or installed signal
//! handlers.
//!
//! `waitpid(-1, ...)` reaps *any* child of this test process, so scenarios
//! here are serialized behind [`LOCK`] to avoid one test's `reap()` stealing
//! another's child-status events when `cargo test` runs them on separate
//! threads of the same process.

use scheduler::runqueue::RunQueue;
use scheduler::supervisor::Supervisor;
use scheduler::sys::{self, WaitStatus};
use std::sync::Mutex;
use std::time::{Duration, Instant};

static LOCK: Mutex<()> = Mutex::new(());

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `reap()` until a predicate over its drained events is satisfied, or
/// `WAIT_TIMEOUT` elapses.
fn reap_until(
    supervisor: &Supervisor,
    mut pred: impl FnMut(&[(libc::pid_t, WaitStatus)]) -> bool,
) -> Vec<(libc::pid_t, WaitStatus)> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    let mut all = Vec::new();
    loop {
        let batch = supervisor.reap().expect("reap");
        all.extend(batch.iter().copied());
        if pred(&all) {
            return all;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for child-status events, saw: {all:?}");
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn spawned_child_self_stops_before_exec() {
    let _guard = LOCK.lock().unwrap();
    let mut supervisor = Supervisor::new();
    let task = supervisor.spawn("/bin/true", &[]).expect("spawn");
    // The handshake barrier: the child raises SIGSTOP on itself before
    // replacing its image, so this must return promptly without the child
    // having run /bin/true yet.
    sys::wait_until_stopped(task.pid).expect("child should self-stop");
    // Let it finish so the test doesn't leak a stopped process.
    sys::kill(task.pid, libc::SIGCONT).unwrap();
    reap_until(&supervisor, |events| {
        events.iter().any(|(pid, _)| *pid == task.pid)
    });
}

#[test]
fn continuing_a_stopped_task_runs_it_to_completion() {
    let _guard = LOCK.lock().unwrap();
    let mut supervisor = Supervisor::new();
    let task = supervisor.spawn("/bin/true", &[]).expect("spawn");
    sys::wait_until_stopped(task.pid).unwrap();

    sys::kill(task.pid, libc::SIGCONT).expect("continue");

    let events = reap_until(&supervisor, |events| {
        events.iter().any(|(pid, status)| {
            *pid == task.pid && matches!(status, WaitStatus::Exited(_))
        })
    });
    let (_, status) = events
        .into_iter()
        .find(|(pid, _)| *pid == task.pid)
        .unwrap();
    assert_eq!(status, WaitStatus::Exited(0));
}

#[test]
fn kill_task_eventually_produces_a_signaled_event() {
    let _guard = LOCK.lock().unwrap();
    let mut supervisor = Supervisor::new();
    // /bin/cat with no arguments blocks reading stdin, so it stays alive
    // long enough to be killed mid-run rather than racing to exit on its
    // own (P6: KILL_TASK must be observed as an asynchronous removal, not
    // a synchronous one).
    let task = supervisor.spawn("/bin/cat", &[]).expect("spawn");
    sys::wait_until_stopped(task.pid).unwrap();
    sys::kill(task.pid, libc::SIGCONT).expect("continue");
    sys::kill(task.pid, libc::SIGKILL).expect("kill");

    let events = reap_until(&supervisor, |events| {
        events.iter().any(|(pid, _)| *pid == task.pid)
    });
    let (_, status) = events
        .into_iter()
        .find(|(pid, _)| *pid == task.pid)
        .unwrap();
    assert_eq!(status, WaitStatus::Signaled(libc::SIGKILL));
}

#[test]
fn reap_drains_coalesced_events_in_one_call() {
    let _guard = LOCK.lock().unwrap();
    let mut supervisor = Supervisor::new();
    let a = supervisor.spawn("/bin/true", &[]).expect("spawn a");
    let b = supervisor.spawn("/bin/true", &[]).expect("spawn b");
    sys::wait_until_stopped(a.pid).unwrap();
    sys::wait_until_stopped(b.pid).unwrap();

    sys::kill(a.pid, libc::SIGCONT).unwrap();
    sys::kill(b.pid, libc::SIGCONT).unwrap();
    // Give both children time to run /bin/true to completion before the
    // first `reap()` call, so a single drain loop has to pick up both
    // (the scenario `on_child`'s drain semantics exist for).
    std::thread::sleep(Duration::from_millis(100));

    let events = reap_until(&supervisor, |events| {
        events.iter().any(|(pid, _)| *pid == a.pid)
            && events.iter().any(|(pid, _)| *pid == b.pid)
    });
    assert!(events.len() >= 2);
}

#[test]
fn killed_cursor_task_is_removed_from_the_run_queue() {
    let _guard = LOCK.lock().unwrap();
    let mut supervisor = Supervisor::new();
    let mut queue = RunQueue::new();

    let a = supervisor.spawn("/bin/cat", &[]).expect("spawn a");
    let b = supervisor.spawn("/bin/cat", &[]).expect("spawn b");
    sys::wait_until_stopped(a.pid).unwrap();
    sys::wait_until_stopped(b.pid).unwrap();
    let a_id = a.id;
    let b_id = b.id;
    queue.insert(a);
    queue.insert(b);
    queue.establish_initial_cursor();
    assert_eq!(queue.cursor_id(), Some(a_id));

    let a_pid = queue.lookup_by_id(a_id).unwrap().pid;
    sys::kill(a_pid, libc::SIGCONT).unwrap();
    sys::kill(a_pid, libc::SIGKILL).unwrap();

    let events = reap_until(&supervisor, |events| {
        events.iter().any(|(pid, _)| *pid == a_pid)
    });
    let was_cursor = queue.cursor_id() == Some(a_id);
    assert!(was_cursor);
    assert!(events
        .iter()
        .any(|(pid, status)| *pid == a_pid && matches!(status, WaitStatus::Signaled(_))));
    // Mirrors `Dispatcher::on_terminated`: the cursor task terminating
    // advances the queue and drops it from the queue's storage.
    let next = queue.advance(true);
    assert_eq!(next, Some(b_id));
    assert!(queue.lookup_by_id(a_id).is_none());

    // Clean up the survivor.
    let b_pid = queue.lookup_by_id(b_id).unwrap().pid;
    sys::kill(b_pid, libc::SIGKILL).unwrap();
    reap_until(&supervisor, |events| {
        events.iter().any(|(pid, _)| *pid == b_pid)
    });
}
