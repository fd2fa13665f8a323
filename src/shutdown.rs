/// Emergency shutdown core (§4.5).
///
/// The source scheduler uses `setjmp`/`longjmp` to unwind synchronously to a
/// landing pad from any context. Rust has no non-local goto, so this is
/// modeled per Design Notes §9: `sched_shutdown` disables interrupts and
/// returns [`ShutdownRequested`] through every foreground frame via `?`;
/// `sched_main`'s outermost loop is the landing pad. An ISR has no Rust call
/// stack to unwind through, so it instead latches the reason and flips
/// [`ShutdownLatch::pending`], which the foreground observes on its next
/// `irq_poll` and turns into the same `Err` path.
use core::sync::atomic::{AtomicU16, AtomicU8, Ordering};

/// Reserved shutdown reason ids the scheduler raises itself. Integrators
/// intern these (and their own reasons) into `u16`s via their build
/// tooling; the scheduler only ever stores and relays the id (§6).
pub mod reason {
    pub const TIMER_TOO_CLOSE: &str = "Timer too close";
    pub const SENTINEL_TIMER_CALLED: &str = "sentinel timer called";
    pub const RESCHEDULED_TIMER_IN_PAST: &str = "Rescheduled timer in the past";
    pub const SHUTDOWN_CLEARED_WHEN_NOT_SHUTDOWN: &str = "Shutdown cleared when not shutdown";
}

/// Propagated from the point a fatal condition is discovered up through
/// every foreground frame to `sched_main`'s landing pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownRequested(pub u16);

const NORMAL: u8 = 0;
const SHUT_DOWN: u8 = 1;
const SHUTTING_DOWN: u8 = 2;

/// Tracks `shutdown_status` and the first-latched `shutdown_reason`, plus the
/// ISR-to-foreground handoff flag. One instance lives on the `Scheduler`
/// singleton.
pub struct ShutdownLatch {
    status: AtomicU8,
    reason: AtomicU16,
    /// Set by an ISR that cannot unwind the Rust stack itself; cleared once
    /// the foreground has turned it into a `ShutdownRequested` error.
    pending: AtomicU8,
}

impl ShutdownLatch {
    pub const fn new() -> Self {
        ShutdownLatch {
            status: AtomicU8::new(NORMAL),
            reason: AtomicU16::new(0),
            pending: AtomicU8::new(0),
        }
    }

    #[inline]
    pub fn is_normal(&self) -> bool {
        self.status.load(Ordering::Relaxed) == NORMAL
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.status.load(Ordering::Relaxed) == SHUTTING_DOWN
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.status.load(Ordering::Relaxed) == SHUT_DOWN
    }

    /// `sched_is_shutdown()`: true for both `SHUTTING_DOWN` and `SHUT_DOWN` —
    /// anything other than `NORMAL` — per the source's `!!shutdown_status`.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.status.load(Ordering::Relaxed) != NORMAL
    }

    /// The latched reason id, valid once [`ShutdownLatch::is_shutdown`] is
    /// true. Reads `0` (never a real interned id, per §6) before any
    /// shutdown has been latched.
    #[inline]
    pub fn reason_id(&self) -> u16 {
        self.reason.load(Ordering::Relaxed)
    }

    /// Latches `reason` iff this is the first shutdown since the last clear
    /// (§7: "the first reason latched... subsequent shutdowns... do not
    /// overwrite"), and transitions `status` to `SHUTTING_DOWN`.
    fn latch(&self, reason: u16) {
        if self.status.load(Ordering::Relaxed) == NORMAL {
            self.reason.store(reason, Ordering::Relaxed);
        }
        self.status.store(SHUTTING_DOWN, Ordering::Relaxed);
    }

    fn finish(&self) -> u16 {
        self.status.store(SHUT_DOWN, Ordering::Relaxed);
        self.reason.load(Ordering::Relaxed)
    }

    /// `sched_clear_shutdown()`. Returns `Ok(())` on a normal clear,
    /// `Err(ShutdownRequested(not_shutdown_reason))` if called while not shut
    /// down (status == `NORMAL`) — itself a fatal condition per §4.5 — or is
    /// silently ignored mid-shutdown (`status == SHUTTING_DOWN`).
    pub fn clear(&self, not_shutdown_reason: u16) -> Result<(), ShutdownRequested> {
        match self.status.load(Ordering::Relaxed) {
            SHUT_DOWN => {
                self.status.store(NORMAL, Ordering::Relaxed);
                Ok(())
            }
            SHUTTING_DOWN => Ok(()), // ignored
            _ => {
                self.latch(not_shutdown_reason);
                Err(ShutdownRequested(not_shutdown_reason))
            }
        }
    }

    /// Called from any foreground frame to trigger a synchronous shutdown.
    /// Always returns `Err` — callers propagate it with `?`.
    pub fn request_from_foreground(&self, reason: u16) -> ShutdownRequested {
        self.latch(reason);
        ShutdownRequested(reason)
    }

    /// `sched_try_shutdown(reason)`: no-op unless currently `NORMAL`, so a
    /// recursive or racing ISR shutdown never overwrites a shutdown already
    /// in progress.
    pub fn try_request_from_isr(&self, reason: u16) {
        if self.is_normal() {
            self.latch(reason);
            self.pending.store(1, Ordering::Relaxed);
        }
    }

    /// Polled once per foreground loop iteration (mirrors `irq_poll`).
    /// Returns `Some` exactly once per ISR-originated shutdown request.
    pub fn take_pending(&self) -> Option<u16> {
        if self.pending.swap(0, Ordering::Relaxed) == 1 {
            Some(self.reason.load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Runs the landing-pad handler's bookkeeping half: latches (if this is
    /// somehow the first notice of shutdown), transitions to `SHUT_DOWN`,
    /// and returns the reason to relay to the host. Timer-list reset and
    /// shutdown-handler invocation are the caller's (`Scheduler`'s)
    /// responsibility since this module has no platform access.
    pub fn run_landing_pad(&self, reason: u16) -> u16 {
        self.latch(reason);
        self.finish()
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_while_shut_down_returns_to_normal() {
        let latch = ShutdownLatch::new();
        latch.run_landing_pad(42);
        assert!(latch.is_shut_down());
        assert!(latch.clear(99).is_ok());
        assert!(latch.is_normal());
    }

    #[test]
    fn clear_while_normal_is_fatal() {
        let latch = ShutdownLatch::new();
        assert!(latch.is_normal());
        assert_eq!(latch.clear(99), Err(ShutdownRequested(99)));
        assert!(latch.is_shutting_down());
    }

    #[test]
    fn clear_while_shutting_down_is_ignored() {
        let latch = ShutdownLatch::new();
        latch.latch(7);
        assert!(latch.is_shutting_down());
        assert!(latch.clear(99).is_ok());
        assert!(latch.is_shutting_down());
    }

    #[test]
    fn first_reason_wins() {
        let latch = ShutdownLatch::new();
        latch.request_from_foreground(1);
        latch.try_request_from_isr(2); // no-op: already shutting down
        assert_eq!(latch.run_landing_pad(1), 1);
    }

    #[test]
    fn isr_request_is_observed_once() {
        let latch = ShutdownLatch::new();
        assert_eq!(latch.take_pending(), None);
        latch.try_request_from_isr(99);
        assert_eq!(latch.take_pending(), Some(99));
        assert_eq!(latch.take_pending(), None);
    }

    #[test]
    fn is_shutdown_true_while_shutting_down_and_while_shut_down() {
        let latch = ShutdownLatch::new();
        assert!(!latch.is_shutdown());

        latch.try_request_from_isr(7);
        assert!(latch.is_shutting_down());
        assert!(latch.is_shutdown());
        assert_eq!(latch.reason_id(), 7);

        latch.run_landing_pad(7);
        assert!(latch.is_shut_down());
        assert!(latch.is_shutdown());
        assert_eq!(latch.reason_id(), 7);
    }
}
