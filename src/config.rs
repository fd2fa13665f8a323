/// The externally-interned `u16` ids for the four reason strings in
/// [`crate::shutdown::reason`]. The scheduler core never assigns its own
/// ids — §6 leaves string interning to the host's build tooling — so these
/// are supplied once by the integrator and threaded into [`SchedConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ReservedReasonIds {
    pub timer_too_close: u16,
    pub sentinel_timer_called: u16,
    pub rescheduled_timer_in_past: u16,
    pub shutdown_cleared_when_not_shutdown: u16,
}

/// Compile-time-ish configuration bundle passed once into `sched_main`,
/// grounded on the retrieved kernel's `BOOTLOADER_CONFIG: BootloaderConfig`
/// static (`src/main.rs`) — a plain data struct built with `..Default` /
/// explicit-field-overrides rather than env vars or a CLI, matching §6's
/// "no on-disk state, no environment variables, no CLI".
#[derive(Debug, Clone, Copy)]
pub struct SchedConfig {
    /// Hardware tick frequency in Hz. Used by [`crate::time::ticks_from_us`].
    pub clock_freq_hz: u32,
    /// How often the `periodic` sentinel re-arms itself. Fixed at 100 ms by
    /// §6 ("Periodic tick rate: fixed at 100 ms"), expressed here in ticks
    /// so it is computed once from `clock_freq_hz` rather than hard-coded.
    pub periodic_period_ticks: u32,
    /// Busy-wait budget the dispatcher's retry loop is extended to once a
    /// budget exhaustion is checked and found not fatal and not due to busy
    /// tasks — i.e. the expected case of "genuinely waiting for a near-future
    /// deadline", which can spin for a while before the next clock read.
    pub timer_idle_repeat_count: u32,
    /// Initial (and smaller) busy-wait budget between clock reads: once it
    /// reaches zero the dispatcher checks whether the miss is fatal or tasks
    /// are busy before deciding whether to extend it to
    /// `timer_idle_repeat_count` and keep spinning.
    pub timer_repeat_count: u32,
    /// Interned ids for the scheduler's own reserved reason strings.
    pub reason_ids: ReservedReasonIds,
}

impl SchedConfig {
    /// `100 ms` periodic period at `clock_freq_hz`, with the repeat budgets
    /// the source scheduler uses.
    pub const fn new(clock_freq_hz: u32, reason_ids: ReservedReasonIds) -> Self {
        SchedConfig {
            clock_freq_hz,
            periodic_period_ticks: crate::time::ticks_from_us(100_000, clock_freq_hz),
            timer_idle_repeat_count: 1000,
            timer_repeat_count: 8,
            reason_ids,
        }
    }
}
