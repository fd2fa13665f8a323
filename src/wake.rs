/// Per-task wake flags and the tri-state `tasks_status` gate between ISR and
/// foreground contexts (§4.4).
///
/// Both are single-byte, single-writer/single-reader locations accessed with
/// relaxed atomics — no mutex, per Design Notes §9 ("declare them with
/// relaxed atomic semantics; do not use mutexes").
use core::sync::atomic::{AtomicBool, AtomicI8, Ordering};

/// A one-bit wake flag for a single foreground task. Set by producers (ISRs
/// or other tasks) via [`WakeFlag::set`]; test-and-cleared by the owning
/// task via [`WakeFlag::check_and_clear`].
pub struct WakeFlag(AtomicBool);

impl WakeFlag {
    pub const fn new() -> Self {
        WakeFlag(AtomicBool::new(false))
    }

    /// `sched_wake_task(w)`: mark this task's wake bit.
    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// `sched_check_wake(w)`: atomically (w.r.t. the single reader) test and
    /// clear the flag.
    #[inline]
    pub fn check_and_clear(&self) -> bool {
        self.0.swap(false, Ordering::Relaxed)
    }
}

impl Default for WakeFlag {
    fn default() -> Self {
        Self::new()
    }
}

const IDLE: i8 = -1;
const REQUESTED: i8 = 0;
const RUNNING: i8 = 1;

/// The three-state gate described in §4.4:
///
/// ```text
///   IDLE (-1)  -- sched_wake_tasks --> REQUESTED (0)
///      ^                                    |
///      |                                    v
///  no work observed                    RUNNING (+1)
///      |                                    |
///      +------ task chain pass ends --------+
/// ```
pub struct TasksStatus(AtomicI8);

impl TasksStatus {
    pub const fn new() -> Self {
        TasksStatus(AtomicI8::new(IDLE))
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed) == REQUESTED
    }

    #[inline]
    pub fn set_idle(&self) {
        self.0.store(IDLE, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_running(&self) {
        self.0.store(RUNNING, Ordering::Relaxed);
    }

    /// `sched_wake_tasks()`: promote to at least `REQUESTED`. A store (not a
    /// CAS) is correct here: the only states are `IDLE < REQUESTED <
    /// RUNNING`, and once the foreground sees anything other than `IDLE` it
    /// will run the task chain again before re-sleeping, so clobbering
    /// `RUNNING` with `REQUESTED` never loses a wakeup — it just means one
    /// more pass than strictly necessary.
    #[inline]
    pub fn request(&self) {
        if self.0.load(Ordering::Relaxed) == IDLE {
            self.0.store(REQUESTED, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn get(&self) -> i8 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for TasksStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Detects "tasks never went idle between two samples" for
/// `sched_check_set_tasks_busy`, called from the dispatcher's busy-wait
/// (§4.3, §4.4). Holds the remembered `tasks_busy` sample.
pub struct BusyTracker(AtomicI8);

impl BusyTracker {
    pub const fn new() -> Self {
        BusyTracker(AtomicI8::new(IDLE))
    }

    /// Returns true if the task loop has not reached `IDLE` since the last
    /// call, then re-samples `tasks_status` into the remembered value.
    pub fn check_and_sample(&self, status: &TasksStatus) -> bool {
        let previous = self.0.load(Ordering::Relaxed);
        let current = status.get();
        self.0.store(current, Ordering::Relaxed);
        previous != IDLE && current != IDLE
    }
}

impl Default for BusyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_flag_round_trips() {
        let w = WakeFlag::new();
        assert!(!w.check_and_clear());
        w.set();
        assert!(w.check_and_clear());
        assert!(!w.check_and_clear());
    }

    #[test]
    fn tasks_status_cycle() {
        let s = TasksStatus::new();
        assert_eq!(s.get(), IDLE);
        s.request();
        assert!(s.is_requested());
        s.set_running();
        assert_eq!(s.get(), RUNNING);
        s.set_idle();
        assert_eq!(s.get(), IDLE);
    }

    #[test]
    fn request_does_not_clobber_running() {
        let s = TasksStatus::new();
        s.set_running();
        s.request();
        assert_eq!(s.get(), RUNNING);
    }

    #[test]
    fn busy_tracker_detects_continuous_activity() {
        let status = TasksStatus::new();
        let tracker = BusyTracker::new();
        status.set_running();
        assert!(!tracker.check_and_sample(&status)); // first sample: was IDLE before
        assert!(tracker.check_and_sample(&status)); // still RUNNING both times
        status.set_idle();
        assert!(!tracker.check_and_sample(&status));
    }
}
