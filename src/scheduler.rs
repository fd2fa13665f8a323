/// The owning singleton (§9's "single owning structure... thin facade") that
/// ties the timer list, wake signaling, and shutdown core together behind
/// one `&mut self` surface, grounded on the retrieved kernel's
/// `SchedulerCore` (`scheduler/sched_core.rs`) mechanism-layer split and its
/// `Executor::run` drain/poll/sleep loop (`task/executor.rs`).
use core::ptr::NonNull;

use crate::config::SchedConfig;
use crate::platform::{with_irqs_disabled, CriticalSection, HostMessage, Platform};
use crate::shutdown::{reason, ShutdownLatch, ShutdownRequested};
use crate::time::timer_is_before;
use crate::timer::{DispatchOutcome, Timer, TimerList};
use crate::wake::{BusyTracker, TasksStatus, WakeFlag};

// `periodic`'s re-arm period (`SchedConfig::periodic_period_ticks`) and a
// pointer back to the owning `Scheduler`'s `tasks_status` are only known at
// `Scheduler::link` time (once `self` has reached its final `'static`
// address), but `TimerFn` is a bare `fn` pointer with no closure capture —
// mirroring the single C global `tasks_status` the source scheduler's
// `periodic` callback touches directly.
static PERIODIC_PERIOD: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);
static PERIODIC_TASKS_STATUS: core::sync::atomic::AtomicPtr<TasksStatus> =
    core::sync::atomic::AtomicPtr::new(core::ptr::null_mut());

fn periodic_fn(t: &mut Timer) -> crate::timer::CallbackResult {
    let period = PERIODIC_PERIOD.load(core::sync::atomic::Ordering::Relaxed);
    t.waketime = t.waketime.wrapping_add(period);

    let status = PERIODIC_TASKS_STATUS.load(core::sync::atomic::Ordering::Relaxed);
    if let Some(status) = unsafe { status.as_ref() } {
        status.request();
    }
    crate::timer::CallbackResult::Reschedule
}

/// Process-singleton scheduler state (§3 "Global scheduler state"):
/// the timer list, the tri-state task gate, the shutdown latch, and the
/// per-task wake flags the integrator hands in.
pub struct Scheduler {
    timers: TimerList,
    tasks_status: TasksStatus,
    tasks_busy: BusyTracker,
    shutdown: ShutdownLatch,
    config: SchedConfig,
}

impl Scheduler {
    /// Builds the scheduler in place. As with [`TimerList::new_unlinked`],
    /// the result is not usable until [`Scheduler::link`] runs at its final
    /// address (e.g. immediately after being moved into a `'static`).
    pub const fn new_unlinked(config: SchedConfig) -> Self {
        Scheduler {
            timers: TimerList::new_unlinked(config.periodic_period_ticks, periodic_fn),
            tasks_status: TasksStatus::new(),
            tasks_busy: BusyTracker::new(),
            shutdown: ShutdownLatch::new(),
            config,
        }
    }

    /// Must be called exactly once, after `self` has reached its final
    /// `'static` storage address, before any other method runs.
    pub fn link(&mut self) {
        PERIODIC_PERIOD.store(self.config.periodic_period_ticks, core::sync::atomic::Ordering::Relaxed);
        PERIODIC_TASKS_STATUS.store(&mut self.tasks_status as *mut TasksStatus, core::sync::atomic::Ordering::Relaxed);
        self.timers.link();
    }

    #[inline]
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    /// `sched_add_timer(t)` (§4.2). Caller must already hold the IRQ lock,
    /// proven by `_cs`. Returns `Err` if the fatal "Timer too close" path
    /// was raised (the timer list is left unmodified; the caller must
    /// propagate the shutdown).
    pub fn add_timer<P: Platform>(
        &mut self,
        platform: &P,
        _cs: &CriticalSection,
        t: NonNull<Timer>,
    ) -> Result<(), ShutdownRequested> {
        let now = platform.now();
        match self.timers.add(t, now) {
            crate::timer::AddOutcome::BecameHead => {
                platform.kick_hardware_timer();
                log::trace!("timer added, became new head");
                Ok(())
            }
            crate::timer::AddOutcome::Inserted => {
                log::trace!("timer added");
                Ok(())
            }
            crate::timer::AddOutcome::TooCloseToNow => {
                log::error!("timer scheduled in the past (now={now})");
                Err(self.shutdown_now(reason::TIMER_TOO_CLOSE, self.config.reason_ids.timer_too_close))
            }
        }
    }

    /// `sched_del_timer(t)` (§4.2). Idempotent; see Design Notes §9's Open
    /// Question — this is deliberately not distinguishable from "never
    /// present" by the caller.
    pub fn del_timer(&mut self, _cs: &CriticalSection, t: NonNull<Timer>) {
        self.timers.del(t);
    }

    /// `sched_timer_reset()` (§4.2). Used only from the shutdown landing
    /// pad; reprogramming hardware afterwards is the caller's job.
    pub fn reset_timers<P: Platform>(&mut self, platform: &P, _cs: &CriticalSection) {
        self.timers.reset();
        platform.kick_hardware_timer();
    }

    /// §4.3 dispatcher, called from ISR context only (already implicitly
    /// under IRQ-disable — no `CriticalSection` token needed since ISRs
    /// cannot be re-entered by the foreground).
    pub fn dispatch_one(&mut self) -> DispatchOutcome {
        self.timers.dispatch_one()
    }

    /// **[ADD]** `dispatch_until_settled`: the bounded retry loop at the
    /// ISR/driver boundary described in SPEC_FULL §4.3. Repeatedly dispatches
    /// while the returned deadline is already due, counting down
    /// `TIMER_REPEAT_COUNT` between checks of the clock. Once that budget is
    /// exhausted: a miss beyond 100 ms slack raises `"Rescheduled timer in
    /// the past"` (§8 scenario 6); otherwise, if tasks are observed busy, the
    /// call returns immediately with no further dispatch and no shutdown
    /// risk (§7 "Recoverable: task wake observed while busy"); otherwise the
    /// budget is extended to the larger `TIMER_IDLE_REPEAT_COUNT` and the
    /// retry continues.
    pub fn dispatch_until_settled<P: Platform>(&mut self, platform: &P) {
        let slack_ticks = crate::time::ticks_from_us(100_000, self.config.clock_freq_hz);
        let mut budget = self.config.timer_repeat_count;
        loop {
            let outcome = self.dispatch_one();
            let next_deadline = match outcome {
                DispatchOutcome::SentinelFired => {
                    log::error!("sentinel timer fired");
                    self.try_shutdown(reason::SENTINEL_TIMER_CALLED, self.config.reason_ids.sentinel_timer_called);
                    return;
                }
                DispatchOutcome::NextDeadline(d) => d,
            };

            let now = platform.now();
            if !timer_is_before(next_deadline, now) {
                return; // next deadline is not yet due
            }

            if budget == 0 {
                let miss = now.wrapping_sub(next_deadline);
                if miss > slack_ticks {
                    log::error!("dispatch could not settle, miss={miss} ticks");
                    self.try_shutdown(
                        reason::RESCHEDULED_TIMER_IN_PAST,
                        self.config.reason_ids.rescheduled_timer_in_past,
                    );
                    return;
                }

                if self.tasks_busy.check_and_sample(&self.tasks_status) {
                    // Tasks are busy: defer further busy-waiting entirely
                    // rather than spinning here. No reason is raised and no
                    // further dispatch happens this call (§7 "Recoverable").
                    return;
                }

                budget = self.config.timer_idle_repeat_count;
                continue;
            }
            budget -= 1;
        }
    }

    /// `sched_wake_task(w)` (§4.4): sets the flag and promotes
    /// `tasks_status` to at least `REQUESTED`.
    pub fn wake_task(&self, w: &WakeFlag) {
        w.set();
        self.tasks_status.request();
    }

    /// `sched_wake_tasks()` (§2, §4.4): promotes `tasks_status` to at least
    /// `REQUESTED` without touching any particular task's wake flag. This is
    /// the primitive the `periodic` heartbeat uses internally so background
    /// work makes forward progress even when no user timer fires; exposed
    /// here as well for any other timer callback that needs to nudge the
    /// task loop without claiming a specific task's work.
    pub fn wake_tasks(&self) {
        self.tasks_status.request();
    }

    /// `sched_check_wake(w)` (§4.4): test-and-clear, called by the task
    /// itself.
    pub fn check_wake(&self, w: &WakeFlag) -> bool {
        w.check_and_clear()
    }

    /// `sched_try_shutdown(reason)` (§4.5): from ISR context, latches and
    /// marks the pending flag for the foreground to observe; recursion-safe
    /// (no-op unless `NORMAL`).
    fn try_shutdown(&self, msg: &'static str, id: u16) {
        log::warn!("{msg}");
        self.shutdown.try_request_from_isr(id);
    }

    /// `sched_shutdown(reason)` (§4.5) from foreground context: always
    /// returns the error for the caller to propagate with `?`.
    fn shutdown_now(&self, msg: &'static str, id: u16) -> ShutdownRequested {
        log::warn!("{msg}");
        self.shutdown.request_from_foreground(id)
    }

    /// `sched_clear_shutdown()` (§4.5).
    pub fn clear_shutdown(&self) -> Result<(), ShutdownRequested> {
        self.shutdown
            .clear(self.config.reason_ids.shutdown_cleared_when_not_shutdown)
    }

    /// `sched_is_shutdown()` (§4.5, §6): true once a shutdown has been
    /// latched, whether or not the landing pad has finished running.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// `sched_report_shutdown()` (§4.5, §6): emits the host-visible
    /// `is_shutdown static_string_id=<reason>` message on demand, independent
    /// of the one-shot `shutdown` message `run_shutdown` sends when the
    /// landing pad first runs.
    pub fn report_shutdown<P: Platform>(&self, platform: &P) {
        platform.send(HostMessage::IsShutdown {
            reason_id: self.shutdown.reason_id(),
        });
    }

    /// Landing-pad handler (`run_shutdown`, §4.5): with interrupts disabled,
    /// latches the reason, resets the timer list, and runs every registered
    /// shutdown handler; only after re-enabling interrupts does it emit the
    /// host-visible `shutdown` message, exactly the order spec.md specifies
    /// (status transitions and handler execution happen under the lock, the
    /// host message does not).
    fn run_shutdown<P: Platform>(&mut self, platform: &P, reason_id: u16) {
        platform.irq_disable();
        // Safety: we just disabled interrupts ourselves.
        let cs = unsafe { CriticalSection::assume_irqs_disabled() };
        self.reset_timers(platform, &cs);
        platform.run_shutdown_chain();
        let reason_id = self.shutdown.run_landing_pad(reason_id);
        self.tasks_status.set_idle();
        drop(cs);
        platform.irq_enable();

        platform.send(HostMessage::Shutdown {
            clock: platform.now(),
            reason_id,
        });
    }

    /// §4.4 foreground loop, grounded on the retrieved kernel's
    /// `Executor::run`/`sleep_if_idle` shape: poll, double-checked sleep,
    /// run the task chain, repeat. Returns (rather than diverging) with
    /// `Err` the moment a fatal condition is observed, so `sched_main`'s
    /// landing-pad loop can run `run_shutdown` and re-enter.
    pub fn run_tasks<P: Platform>(&mut self, platform: &P) -> Result<(), ShutdownRequested> {
        loop {
            platform.irq_poll();
            if let Some(reason_id) = self.shutdown.take_pending() {
                return Err(ShutdownRequested(reason_id));
            }

            if !self.tasks_status.is_requested() {
                let woken_by_shutdown = with_irqs_disabled(platform, |_cs| {
                    if !self.tasks_status.is_requested() {
                        self.tasks_status.set_idle();
                        loop {
                            platform.irq_wait();
                            if self.tasks_status.is_requested() {
                                return None;
                            }
                            if let Some(reason_id) = self.shutdown.take_pending() {
                                return Some(reason_id);
                            }
                        }
                    }
                    None
                });
                if let Some(reason_id) = woken_by_shutdown {
                    return Err(ShutdownRequested(reason_id));
                }
            }

            if let Some(reason_id) = self.shutdown.take_pending() {
                return Err(ShutdownRequested(reason_id));
            }

            self.tasks_status.set_running();
            platform.run_task_chain();
            self.tasks_status.set_idle();
        }
    }
}

/// `sched_main` (§4.6): run the init chain, emit `starting`, install the
/// landing pad, enter the task loop. Diverges — the only return from this
/// function is via `!`, matching the retrieved kernel's `kernel_main`.
pub fn sched_main<P: Platform>(platform: &P, scheduler: &mut Scheduler) -> ! {
    platform.run_init_chain();
    platform.send(HostMessage::Starting);

    loop {
        match scheduler.run_tasks(platform) {
            Ok(()) => unreachable!("run_tasks only returns via Err"),
            Err(ShutdownRequested(reason_id)) => {
                scheduler.run_shutdown(platform, reason_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::vec::Vec;

    /// Deterministic fake grounded on the pack's `SchedFixture`-style test
    /// harnesses: `now` is driven explicitly by the test rather than a real
    /// clock, and every chain/transport call is recorded instead of acting
    /// on real hardware.
    struct FakePlatform {
        now: AtomicU32,
        kicked: Cell<u32>,
        sent: std::cell::RefCell<Vec<HostMessage>>,
        init_calls: Cell<u32>,
        task_calls: Cell<u32>,
        shutdown_calls: Cell<u32>,
    }

    impl FakePlatform {
        fn new(now: u32) -> Self {
            FakePlatform {
                now: AtomicU32::new(now),
                kicked: Cell::new(0),
                sent: std::cell::RefCell::new(Vec::new()),
                init_calls: Cell::new(0),
                task_calls: Cell::new(0),
                shutdown_calls: Cell::new(0),
            }
        }
    }

    impl Platform for FakePlatform {
        type IrqState = ();

        fn now(&self) -> u32 {
            self.now.load(Ordering::Relaxed)
        }
        fn kick_hardware_timer(&self) {
            self.kicked.set(self.kicked.get() + 1);
        }
        fn irq_save(&self) -> () {}
        fn irq_restore(&self, _state: ()) {}
        fn irq_disable(&self) {}
        fn irq_enable(&self) {}
        fn irq_wait(&self) {}
        fn irq_poll(&self) {}
        fn ticks_from_us(&self, us: u32) -> u32 {
            us
        }
        fn run_init_chain(&self) {
            self.init_calls.set(self.init_calls.get() + 1);
        }
        fn run_task_chain(&self) {
            self.task_calls.set(self.task_calls.get() + 1);
        }
        fn run_shutdown_chain(&self) {
            self.shutdown_calls.set(self.shutdown_calls.get() + 1);
        }
        fn send(&self, message: HostMessage) {
            self.sent.borrow_mut().push(message);
        }
    }

    const REASON_IDS: crate::config::ReservedReasonIds = crate::config::ReservedReasonIds {
        timer_too_close: 1,
        sentinel_timer_called: 2,
        rescheduled_timer_in_past: 3,
        shutdown_cleared_when_not_shutdown: 4,
    };

    fn fn_done(_t: &mut Timer) -> crate::timer::CallbackResult {
        crate::timer::CallbackResult::Done
    }

    /// §8 scenario 2: two timers added in order dispatch in `waketime` order.
    #[test]
    fn two_timers_in_order() {
        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(1000);

        let mut a = Timer::new(1500, fn_done);
        let mut b = Timer::new(2000, fn_done);
        let pa = NonNull::from(&mut a);
        let pb = NonNull::from(&mut b);
        let cs = unsafe { CriticalSection::assume_irqs_disabled() };

        sched.add_timer(&platform, &cs, pa).unwrap();
        sched.add_timer(&platform, &cs, pb).unwrap();
        assert_eq!(sched.timers.head_waketime(), 1500);

        // First dispatch only consumes the `deleted` placeholder spliced in
        // when A became head; A's own callback hasn't run yet.
        match sched.dispatch_one() {
            DispatchOutcome::NextDeadline(d) => assert_eq!(d, 1500),
            DispatchOutcome::SentinelFired => panic!("unexpected sentinel"),
        }
        match sched.dispatch_one() {
            DispatchOutcome::NextDeadline(d) => assert_eq!(d, 2000),
            DispatchOutcome::SentinelFired => panic!("unexpected sentinel"),
        }
        match sched.dispatch_one() {
            DispatchOutcome::NextDeadline(d) => assert_eq!(d, config.periodic_period_ticks),
            DispatchOutcome::SentinelFired => panic!("unexpected sentinel"),
        }
    }

    /// §8 scenario 3: head displacement kicks the hardware timer.
    #[test]
    fn head_displacement_kicks_hardware() {
        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(1000);
        let cs = unsafe { CriticalSection::assume_irqs_disabled() };

        let mut a = Timer::new(5000, fn_done);
        sched.add_timer(&platform, &cs, NonNull::from(&mut a)).unwrap();
        assert_eq!(platform.kicked.get(), 1); // before periodic(100_000): becomes head
        assert_eq!(sched.timers.head_waketime(), 5000);

        let mut b = Timer::new(1200, fn_done);
        sched.add_timer(&platform, &cs, NonNull::from(&mut b)).unwrap();
        assert_eq!(platform.kicked.get(), 2);
        assert_eq!(sched.timers.head_waketime(), 1200);
    }

    /// §8 boundary: scheduling in the past raises `"Timer too close"`.
    #[test]
    fn add_timer_in_past_raises_shutdown() {
        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(1000);
        let cs = unsafe { CriticalSection::assume_irqs_disabled() };

        let mut a = Timer::new(990, fn_done);
        let err = sched.add_timer(&platform, &cs, NonNull::from(&mut a)).unwrap_err();
        assert_eq!(err, ShutdownRequested(REASON_IDS.timer_too_close));
    }

    /// §8 scenario 6: a timer that always reschedules into the past exhausts
    /// the repeat budgets and raises `"Rescheduled timer in the past"`.
    #[test]
    fn chronically_late_timer_triggers_shutdown() {
        fn reschedule_in_past(t: &mut Timer) -> crate::timer::CallbackResult {
            t.waketime = t.waketime.wrapping_sub(20_000);
            crate::timer::CallbackResult::Reschedule
        }

        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(5000);
        let cs = unsafe { CriticalSection::assume_irqs_disabled() };

        // Accepted at exactly `now` (the too-close guard is strict `<`).
        let mut a = Timer::new(5000, reschedule_in_past);
        sched.add_timer(&platform, &cs, NonNull::from(&mut a)).unwrap();

        // Advance the clock past the timer's waketime so the `deleted`
        // placeholder bounce spliced in when it became head is itself
        // already due; from here every subsequent dispatch reschedules
        // further into the past against a clock that never advances again,
        // so the retry budget exhausts and the miss exceeds the 100 ms slack.
        platform.now.store(5001, Ordering::Relaxed);

        sched.dispatch_until_settled(&platform);
        assert!(sched.shutdown.take_pending().is_some());
    }

    /// §8 scenario 5: an ISR-originated shutdown is observed by the
    /// landing pad, resets timers, runs shutdown handlers exactly once, and
    /// emits the host-visible message after re-enabling interrupts.
    #[test]
    fn isr_shutdown_runs_landing_pad() {
        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(5000);

        sched.try_shutdown(reason::SENTINEL_TIMER_CALLED, 42);
        let reason_id = sched.shutdown.take_pending().expect("isr shutdown pending");
        sched.run_shutdown(&platform, reason_id);

        assert_eq!(platform.shutdown_calls.get(), 1);
        assert!(sched.shutdown.is_shut_down());
        assert_eq!(
            platform.sent.borrow().last(),
            Some(&HostMessage::Shutdown { clock: 5000, reason_id: 42 })
        );
    }

    #[test]
    fn is_shutdown_and_report_shutdown_reflect_latched_reason() {
        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(5000);

        assert!(!sched.is_shutdown());

        sched.try_shutdown(reason::SENTINEL_TIMER_CALLED, 42);
        assert!(sched.is_shutdown());

        sched.report_shutdown(&platform);
        assert_eq!(platform.sent.borrow().last(), Some(&HostMessage::IsShutdown { reason_id: 42 }));
    }

    #[test]
    fn forcing_sentinel_fires_raises_reserved_reason() {
        let config = SchedConfig::new(1_000_000, REASON_IDS);
        let mut sched = Scheduler::new_unlinked(config);
        sched.link();
        let platform = FakePlatform::new(0);

        sched.timers.force_head_to_sentinel();
        sched.dispatch_until_settled(&platform);
        let pending = sched.shutdown.take_pending();
        assert_eq!(pending, Some(REASON_IDS.sentinel_timer_called));
    }
}
