/// Intrusive, singly-linked, `waketime`-sorted timer list.
///
/// The list is never empty: it begins `periodic -> sentinel` and always ends
/// at `sentinel`. `sentinel.waketime == periodic.waketime + 0x8000_0000`, so
/// any correctly-scheduled user timer's `waketime` is strictly before both
/// `periodic` and `sentinel` — insertion always finds a splice point before
/// falling off the end, and no traversal needs a null check.
use core::ptr::NonNull;

use crate::time::timer_is_before;

/// Post-condition a timer callback reports to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackResult {
    /// The timer fires no more; the dispatcher removes it from the list.
    Done,
    /// The callback updated `waketime` itself; the dispatcher re-sorts it.
    Reschedule,
    /// The built-in `sentinel` timer fired. This must never happen in a
    /// correctly operating system (§3 invariants guarantee every
    /// user-scheduled timer's `waketime` sorts before it) — reported up so
    /// the owning `Scheduler` can raise `"sentinel timer called"`.
    SentinelFired,
}

/// Result of [`TimerList::dispatch_one`]: either the next hardware deadline
/// to program, or notice that the `sentinel` fired and the owning
/// `Scheduler` must raise `"sentinel timer called"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    NextDeadline(u32),
    SentinelFired,
}

pub type TimerFn = fn(&mut Timer) -> CallbackResult;

/// A single pending timer. Ownership passes to the scheduler on
/// [`TimerList::add`] and returns on [`TimerList::del`] or when a callback
/// returns [`CallbackResult::Done`].
#[repr(C)]
pub struct Timer {
    pub waketime: u32,
    func: TimerFn,
    next: Option<NonNull<Timer>>,
}

// A `Timer` is only ever touched while the owning `Scheduler`'s IRQ-disable
// discipline is observed (see `platform::CriticalSection`); it is not
// independently thread-safe.
unsafe impl Send for Timer {}

impl Timer {
    pub const fn new(waketime: u32, func: TimerFn) -> Self {
        Timer {
            waketime,
            func,
            next: None,
        }
    }

    #[inline]
    fn invoke(&mut self) -> CallbackResult {
        (self.func)(self)
    }
}

fn sentinel_fn(_t: &mut Timer) -> CallbackResult {
    CallbackResult::SentinelFired
}

/// Outcome of [`TimerList::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Spliced in as the new head; the hardware deadline must be
    /// reprogrammed (`Platform::kick_hardware_timer`).
    BecameHead,
    /// Spliced in after some other node; the current hardware deadline
    /// still holds.
    Inserted,
    /// `t.waketime` was already due (at-or-before `now`). Nothing was
    /// inserted; the caller must raise `"Timer too close"`.
    TooCloseToNow,
}

/// Mechanism half of §4.2/§4.3: pure pointer-splicing and dispatch, with no
/// knowledge of IRQ state or the host platform. The owning `Scheduler`
/// (see `scheduler.rs`) is responsible for holding the IRQ lock around the
/// mutating calls and for acting on [`AddOutcome::TooCloseToNow`] /
/// [`AddOutcome::BecameHead`].
pub struct TimerList {
    head: NonNull<Timer>,
    last_insert: NonNull<Timer>,
    periodic: Timer,
    sentinel: Timer,
    deleted: Timer,
}

// Safety: see `Timer`'s impl — same single-context discipline applies to
// the list that owns them.
unsafe impl Send for TimerList {}

impl TimerList {
    /// Builds the list skeleton with placeholder (null-equivalent) links.
    /// The returned value is **not yet usable** — call [`TimerList::link`]
    /// once it has reached its final, stable storage location (the
    /// sentinels are self-referential and must not move afterwards).
    pub const fn new_unlinked(periodic_period_ticks: u32, periodic_func: TimerFn) -> Self {
        TimerList {
            // Dangling until `link()` runs; never dereferenced before then.
            head: NonNull::dangling(),
            last_insert: NonNull::dangling(),
            periodic: Timer::new(periodic_period_ticks, periodic_func),
            sentinel: Timer::new(periodic_period_ticks.wrapping_add(0x8000_0000), sentinel_fn),
            deleted: Timer::new(0, |_| CallbackResult::Done),
        }
    }

    /// Fixes up the self-referential pointers. Must be called exactly once,
    /// after `self` has reached its final address (e.g. immediately after
    /// being moved into a `'static` scheduler singleton), and before any
    /// other method is used.
    pub fn link(&mut self) {
        let sentinel_ptr = NonNull::from(&mut self.sentinel);
        self.sentinel.next = Some(sentinel_ptr); // self-loop: never traversed, never panics
        self.periodic.next = Some(sentinel_ptr);
        let periodic_ptr = NonNull::from(&mut self.periodic);
        self.head = periodic_ptr;
        self.last_insert = periodic_ptr;
    }

    #[inline]
    fn waketime_of(&self, p: NonNull<Timer>) -> u32 {
        unsafe { p.as_ref().waketime }
    }

    #[inline]
    fn next_of(&self, p: NonNull<Timer>) -> NonNull<Timer> {
        unsafe { p.as_ref().next.expect("list node missing next; sentinel invariant broken") }
    }

    #[inline]
    fn set_next(&mut self, p: NonNull<Timer>, next: NonNull<Timer>) {
        unsafe { (*p.as_ptr()).next = Some(next) };
    }

    #[inline]
    fn sentinel_addr(&self) -> NonNull<Timer> {
        // Safe: `&self.sentinel` is a live reference for the duration of `self`.
        unsafe { NonNull::new_unchecked(&self.sentinel as *const Timer as *mut Timer) }
    }

    pub fn head(&self) -> NonNull<Timer> {
        self.head
    }

    pub fn head_waketime(&self) -> u32 {
        self.waketime_of(self.head)
    }

    pub fn periodic_ptr(&mut self) -> NonNull<Timer> {
        NonNull::from(&mut self.periodic)
    }

    pub fn deleted_ptr(&mut self) -> NonNull<Timer> {
        NonNull::from(&mut self.deleted)
    }

    /// Test-only hook for forcing the §8 boundary case ("force sentinel.func
    /// to run") from outside this module, since `head` itself is private.
    #[cfg(test)]
    pub(crate) fn force_head_to_sentinel(&mut self) {
        self.head = self.sentinel_ptr();
    }

    pub fn sentinel_ptr(&mut self) -> NonNull<Timer> {
        NonNull::from(&mut self.sentinel)
    }

    /// Returns true iff `t` is currently linked somewhere in this list
    /// (used to validate `last_insert` after deletions — O(n), diagnostics
    /// only, never on the hot path).
    pub fn contains(&self, t: NonNull<Timer>) -> bool {
        let mut cur = self.head;
        loop {
            if cur == t {
                return true;
            }
            if cur == self.sentinel_addr() {
                return false;
            }
            cur = self.next_of(cur);
        }
    }

    /// §4.2 `add(t)`. `now` is the current tick, used only for the
    /// too-close-to-fire sanity check on a head insertion.
    pub fn add(&mut self, t: NonNull<Timer>, now: u32) -> AddOutcome {
        let t_wake = self.waketime_of(t);
        let head_wake = self.waketime_of(self.head);

        if timer_is_before(t_wake, head_wake) {
            if timer_is_before(t_wake, now) {
                return AddOutcome::TooCloseToNow;
            }
            // `t` becomes head, but not directly: `deleted` is spliced in
            // front of it carrying `t`'s waketime, so the very next dispatch
            // is a free DONE bounce off `deleted` that advances the head to
            // `t` without invoking `t`'s callback early. If the old head was
            // itself `deleted` (a prior displacement not yet dispatched),
            // `t` links past it to the old head's own `next` instead of
            // looping back onto `deleted`.
            let old_head = self.head;
            let splice_next = if old_head == self.deleted_ptr() {
                self.next_of(old_head)
            } else {
                old_head
            };
            self.set_next(t, splice_next);
            let deleted = self.deleted_ptr();
            unsafe {
                (*deleted.as_ptr()).waketime = t_wake;
            }
            self.set_next(deleted, t);
            self.head = deleted;
            return AddOutcome::BecameHead;
        }

        // Walk forward from the hint, or from the head if the hint is
        // already past `t`.
        let mut pos = if timer_is_before(t_wake, self.waketime_of(self.last_insert)) {
            self.head
        } else {
            self.last_insert
        };
        loop {
            let next = self.next_of(pos);
            if timer_is_before(t_wake, self.waketime_of(next)) {
                break;
            }
            pos = next;
        }
        let next = self.next_of(pos);
        self.set_next(t, next);
        self.set_next(pos, t);
        self.last_insert = t;
        AddOutcome::Inserted
    }

    /// §4.2 `del(t)`. Idempotent: a `t` not currently linked is a silent
    /// no-op (see Design Notes §9's Open Question).
    pub fn del(&mut self, t: NonNull<Timer>) {
        if self.head == t {
            let next = self.next_of(t);
            let wake = self.waketime_of(t);
            let deleted = self.deleted_ptr();
            unsafe {
                (*deleted.as_ptr()).waketime = wake;
            }
            self.set_next(deleted, next);
            self.head = deleted;
            if self.last_insert == t {
                self.last_insert = self.periodic_ptr();
            }
            return;
        }

        let mut pos = self.head;
        loop {
            let next = self.next_of(pos);
            if next == self.sentinel_addr() {
                // Reached the end without finding `t`: idempotent no-op.
                break;
            }
            if next == t {
                let after = self.next_of(next);
                self.set_next(pos, after);
                break;
            }
            pos = next;
        }

        if self.last_insert == t {
            self.last_insert = self.periodic_ptr();
        }
    }

    /// §4.2 `reset()`. Wipes all user timers: `deleted -> periodic ->
    /// sentinel`. Does not reprogram hardware — the caller (`Scheduler`)
    /// does that after calling this, mirroring `add`'s `BecameHead` contract.
    ///
    /// `periodic.next` is unconditionally restored to `sentinel`: a user
    /// timer scheduled more than one periodic period out sorts between
    /// `periodic` and `sentinel` in steady state, so `periodic.next` may
    /// point at a user timer at reset time. Leaving it there would dangle a
    /// reference to a timer this call is supposed to release.
    pub fn reset(&mut self) {
        let periodic = self.periodic_ptr();
        let periodic_wake = self.waketime_of(periodic);
        let sentinel = self.sentinel_ptr();
        self.set_next(periodic, sentinel);
        let deleted = self.deleted_ptr();
        unsafe {
            (*deleted.as_ptr()).waketime = periodic_wake;
        }
        self.set_next(deleted, periodic);
        self.head = deleted;
        self.last_insert = periodic;
    }

    /// §4.3 dispatcher. Invokes the head timer's callback exactly once and
    /// returns the new head's `waketime`, the absolute deadline the hardware
    /// layer should fire at next.
    pub fn dispatch_one(&mut self) -> DispatchOutcome {
        let head = self.head;
        let res = unsafe { (*head.as_ptr()).invoke() };

        match res {
            CallbackResult::Done => {
                let next = self.next_of(head);
                self.head = next;
                // Matches the source dispatcher: `last_insert` follows the
                // removed timer to its successor, not back to `periodic`.
                if self.last_insert == head {
                    self.last_insert = next;
                }
            }
            CallbackResult::Reschedule => {
                let new_wake = self.waketime_of(head);
                let next = self.next_of(head);
                if timer_is_before(new_wake, self.waketime_of(next)) {
                    // Cheapest case: still sorted correctly in place as head.
                } else {
                    self.head = next;
                    // Matches the source dispatcher: compare the
                    // rescheduled timer's own new waketime against
                    // `last_insert`'s, not `next`'s — `last_insert` may be
                    // stale relative to the new head.
                    let start_from_head =
                        timer_is_before(new_wake, self.waketime_of(self.last_insert));
                    let search_start = if start_from_head { next } else { self.last_insert };
                    self.reinsert_after_search(head, search_start);
                }
            }
            CallbackResult::SentinelFired => return DispatchOutcome::SentinelFired,
        }

        DispatchOutcome::NextDeadline(self.waketime_of(self.head))
    }

    /// Re-insertion path used by `dispatch_one`'s reschedule branch: same
    /// walk as `add`, but starting from an explicit hint and never subject
    /// to the "too close to now" guard (a rescheduling callback is trusted;
    /// a chronically-late one is caught by `dispatch_until_settled`).
    fn reinsert_after_search(&mut self, t: NonNull<Timer>, search_start: NonNull<Timer>) {
        let t_wake = self.waketime_of(t);
        let mut pos = search_start;
        loop {
            let next = self.next_of(pos);
            if timer_is_before(t_wake, self.waketime_of(next)) {
                break;
            }
            pos = next;
        }
        let next = self.next_of(pos);
        self.set_next(t, next);
        self.set_next(pos, t);
        self.last_insert = t;
    }
}
