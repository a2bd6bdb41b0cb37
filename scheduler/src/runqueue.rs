//! The run queue: two FIFOs (HIGH, LOW) concatenated into one circular
//! dispatch order, HIGH always ahead of LOW, plus an explicit cursor
//! identifying the task that is (or was most recently) `RUNNING`.
//!
//! The cursor is tracked explicitly rather than derived as "front of the
//! active class," because a `promote`/`demote` of some *other* task can
//! reshuffle which task sits at the front of a class without changing which
//! task the kernel actually has continued. Invariant I2 still holds at
//! every quiescent moment in the sense that matters operationally: the
//! moment the active class changes out from under the cursor, the next
//! `advance()` (driven by the next TICK/STOPPED pair) picks the new active
//! class's front (the cursor is never more than one quantum stale).

use crate::task::{Priority, State, Task, TaskId};
use std::collections::VecDeque;

/// Ordered multiset of tasks, partitioned by priority, preserving
/// round-robin order within each class.
#[derive(Default)]
pub struct RunQueue {
    high: VecDeque<Task>,
    low: VecDeque<Task>,
    cursor: Option<TaskId>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            high: VecDeque::new(),
            low: VecDeque::new(),
            cursor: None,
        }
    }

    fn class_mut(&mut self, priority: Priority) -> &mut VecDeque<Task> {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }

    fn priority_of(&self, id: TaskId) -> Option<Priority> {
        if self.high.iter().any(|t| t.id == id) {
            Some(Priority::High)
        } else if self.low.iter().any(|t| t.id == id) {
            Some(Priority::Low)
        } else {
            None
        }
    }

    /// The priority class the dispatcher draws a *new* cursor from once the
    /// current one advances.
    pub fn active_class(&self) -> Priority {
        if !self.high.is_empty() {
            Priority::High
        } else {
            Priority::Low
        }
    }

    /// The id of the task that is, or was last, `RUNNING`. `None` iff no
    /// cursor has ever been established or the queue has since emptied.
    pub fn cursor_id(&self) -> Option<TaskId> {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    /// Appends `task` to the tail of its own priority class. O(1) amortised.
    pub fn insert(&mut self, task: Task) {
        let class = self.class_mut(task.priority);
        class.push_back(task);
    }

    /// Establishes the initial cursor at bootstrap (§4.3 step 5): the head
    /// of the queue. No-op if a cursor is already set.
    pub fn establish_initial_cursor(&mut self) {
        if self.cursor.is_none() {
            self.cursor = self.high.front().or_else(|| self.low.front()).map(|t| t.id);
        }
    }

    /// Locates and unlinks the task with the given pid, from either class.
    /// If it was the cursor, the cursor is cleared (callers handling a
    /// cursor termination should use [`advance`](Self::advance) instead,
    /// which also picks the next cursor).
    pub fn remove_by_pid(&mut self, pid: libc::pid_t) -> Option<Task> {
        if let Some(pos) = self.high.iter().position(|t| t.pid == pid) {
            let task = self.high.remove(pos);
            self.clear_cursor_if(&task);
            return task;
        }
        if let Some(pos) = self.low.iter().position(|t| t.pid == pid) {
            let task = self.low.remove(pos);
            self.clear_cursor_if(&task);
            return task;
        }
        None
    }

    fn clear_cursor_if(&mut self, task: &Option<Task>) {
        if let Some(task) = task {
            if self.cursor == Some(task.id) {
                self.cursor = None;
            }
        }
    }

    pub fn lookup_by_id(&self, id: TaskId) -> Option<&Task> {
        self.high
            .iter()
            .chain(self.low.iter())
            .find(|t| t.id == id)
    }

    pub fn lookup_by_pid(&self, pid: libc::pid_t) -> Option<&Task> {
        self.high
            .iter()
            .chain(self.low.iter())
            .find(|t| t.pid == pid)
    }

    /// Advances the cursor, returning the id of the next task to dispatch
    /// (or `None` if the queue is now empty).
    ///
    /// `terminated = true`: the current cursor task is about to disappear
    /// (it has already exited or been killed). It is unlinked from its
    /// class and dropped here: this *is* the removal the caller needs,
    /// there is no separate step.
    ///
    /// `terminated = false`: a quantum expired. The cursor task remains in
    /// the queue, moved to the tail of its class.
    ///
    /// Selection rule for the new cursor: if HIGH is non-empty, it is
    /// always the HIGH class's front; LOW is only consulted once HIGH is
    /// empty.
    pub fn advance(&mut self, terminated: bool) -> Option<TaskId> {
        if let Some(cur_id) = self.cursor {
            if let Some(priority) = self.priority_of(cur_id) {
                let class = self.class_mut(priority);
                if let Some(pos) = class.iter().position(|t| t.id == cur_id) {
                    let mut task = class.remove(pos).unwrap();
                    if !terminated {
                        task.state = State::Ready;
                        class.push_back(task);
                    }
                    // else: `task` is dropped here, freeing its storage.
                }
            }
        }
        self.cursor = self.high.front().or_else(|| self.low.front()).map(|t| t.id);
        self.cursor
    }

    /// Moves the task to `priority = HIGH`, at the tail of the HIGH class.
    /// No-op if the task is already HIGH, or absent. Does not move the
    /// cursor: a promoted task that is not the cursor only becomes the
    /// dispatcher's next choice once the current quantum's `advance` runs.
    pub fn promote(&mut self, id: TaskId) {
        if let Some(pos) = self.low.iter().position(|t| t.id == id) {
            let mut task = self.low.remove(pos).unwrap();
            task.priority = Priority::High;
            self.high.push_back(task);
        }
    }

    /// Moves the task to `priority = LOW`, at the tail of the LOW class.
    /// No-op if the task is already LOW, or absent.
    pub fn demote(&mut self, id: TaskId) {
        if let Some(pos) = self.high.iter().position(|t| t.id == id) {
            let mut task = self.high.remove(pos).unwrap();
            task.priority = Priority::Low;
            self.low.push_back(task);
        }
    }

    /// Snapshot of every task in dispatch order (HIGH class first), for
    /// `PRINT_TASKS`.
    pub fn list(&self) -> Vec<(TaskId, libc::pid_t, String, Priority)> {
        self.high
            .iter()
            .chain(self.low.iter())
            .map(|t| (t.id, t.pid, t.name.clone(), t.priority))
            .collect()
    }

    /// Marks the cursor task as `RUNNING`. Called by the dispatcher right
    /// after it has delivered a continue-signal.
    pub fn mark_cursor_running(&mut self) {
        let Some(cur_id) = self.cursor else { return };
        if let Some(task) = self
            .high
            .iter_mut()
            .chain(self.low.iter_mut())
            .find(|t| t.id == cur_id)
        {
            task.state = State::Running;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn task(id: TaskId, pid: libc::pid_t, name: &str) -> Task {
        Task::new(id, pid, name.to_string())
    }

    fn with_cursor(mut q: RunQueue) -> RunQueue {
        q.establish_initial_cursor();
        q
    }

    #[test]
    fn fifo_within_a_class() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        q.insert(task(2, 102, "c"));
        let mut q = with_cursor(q);
        assert_eq!(q.cursor_id(), Some(0));
        assert_eq!(q.advance(false), Some(1));
        assert_eq!(q.advance(false), Some(2));
        assert_eq!(q.advance(false), Some(0));
    }

    #[test]
    fn high_preempts_low() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        let mut q = with_cursor(q);
        assert_eq!(q.active_class(), Priority::Low);
        q.promote(1);
        assert_eq!(q.active_class(), Priority::High);
        // The cursor is still task 0 until the next advance. Promoting a
        // task other than the cursor does not preempt mid-quantum (that
        // would be preemption below signal granularity, out of scope).
        assert_eq!(q.cursor_id(), Some(0));
        assert_eq!(q.advance(false), Some(1));
        // Only one HIGH task: it keeps being the cursor across rotations.
        assert_eq!(q.advance(false), Some(1));
        assert_eq!(q.advance(false), Some(1));
    }

    #[test]
    fn promoting_the_running_task_keeps_it_the_cursor() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        let mut q = with_cursor(q);
        assert_eq!(q.cursor_id(), Some(0));
        q.promote(0);
        assert_eq!(q.cursor_id(), Some(0));
        assert_eq!(q.active_class(), Priority::High);
        assert_eq!(q.advance(false), Some(0));
    }

    #[test]
    fn demote_restores_low_fairness_at_the_tail() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        q.insert(task(2, 102, "c"));
        let mut q = with_cursor(q);
        q.promote(1);
        q.advance(false); // cursor becomes the lone HIGH task, 1
        assert_eq!(q.cursor_id(), Some(1));
        // Demoting goes to the tail of LOW, which currently holds [a, c].
        q.demote(1);
        assert_eq!(q.active_class(), Priority::Low);
        // The cursor is still 1 (still actually running) until the next
        // advance re-syncs it to the now-active LOW class.
        assert_eq!(q.cursor_id(), Some(1));
        assert_eq!(q.advance(false), Some(2));
        assert_eq!(q.advance(false), Some(0));
        assert_eq!(q.advance(false), Some(1));
    }

    #[test]
    fn demote_last_high_task_leaves_high_empty() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        let mut q = with_cursor(q);
        q.promote(0);
        assert_eq!(q.active_class(), Priority::High);
        q.demote(0);
        assert_eq!(q.active_class(), Priority::Low);
        assert_eq!(q.advance(false), Some(0));
    }

    #[test]
    fn promote_is_idempotent() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        let mut q = with_cursor(q);
        q.promote(0);
        let before = q.list();
        q.promote(0);
        let after = q.list();
        assert_eq!(
            before.iter().map(|t| t.0).collect::<Vec<_>>(),
            after.iter().map(|t| t.0).collect::<Vec<_>>()
        );
    }

    #[test]
    fn promote_then_demote_is_identity_for_a_low_tail_task() {
        // P4's identity only holds when the promoted/demoted task is
        // already at the tail of LOW: demotion re-inserts at the tail,
        // so promoting/demoting a task from the middle of LOW changes
        // its position relative to the others.
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        q.insert(task(2, 102, "c"));
        let mut q = with_cursor(q);
        let before: Vec<_> = q.list().into_iter().map(|t| t.0).collect();
        q.promote(2);
        q.demote(2);
        let after: Vec<_> = q.list().into_iter().map(|t| t.0).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn terminated_cursor_is_removed_and_not_dispatched_again() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        let mut q = with_cursor(q);
        assert_eq!(q.advance(true), Some(1));
        assert!(q.lookup_by_id(0).is_none());
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_by_pid_finds_either_class() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        let mut q = with_cursor(q);
        q.promote(1);
        let removed = q.remove_by_pid(101).unwrap();
        assert_eq!(removed.id, 1);
        assert!(q.lookup_by_pid(101).is_none());
        assert_eq!(q.active_class(), Priority::Low);
    }

    #[test]
    fn killing_a_non_cursor_task_does_not_disturb_the_cursor() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        q.insert(task(1, 101, "b"));
        let mut q = with_cursor(q);
        assert_eq!(q.cursor_id(), Some(0));
        q.remove_by_pid(101);
        assert_eq!(q.cursor_id(), Some(0));
    }

    #[test]
    fn draining_to_empty_reports_no_cursor() {
        let mut q = RunQueue::new();
        q.insert(task(0, 100, "a"));
        let mut q = with_cursor(q);
        assert_eq!(q.advance(true), None);
        assert!(q.is_empty());
    }
}
