/// The host-platform primitives the scheduler core depends on but does not
/// implement: the hardware-timer driver, IRQ control, the init/task/shutdown
/// registries, and the serial/transport layer. Bundled into one trait so the
/// core stays generic and is exercisable against a deterministic fake in
/// tests, the way the retrieved corpus's HAL-shaped crates (e.g. the
/// `kernel::hil::time::Time`/`Alarm` traits wrapping `InternalTimers` in the
/// pack) separate mechanism from the concrete chip.
use core::fmt;

/// Opaque token returned by [`Platform::irq_save`] and handed back to
/// [`Platform::irq_restore`]. Platforms that only have on/off IRQ control
/// (no nested-depth counter) can make this a unit struct; platforms with
/// nested critical sections can stash a saved flags word in it.
pub trait IrqState: Copy {}

impl IrqState for () {}

/// Zero-sized proof that interrupts are currently disabled, threaded through
/// every timer-list mutation so the §5 "must hold the IRQ lock" discipline is
/// a compile-time requirement rather than a comment. Constructed only by
/// [`Platform::irq_save`] / the critical-section helpers in this module.
pub struct CriticalSection(());

impl CriticalSection {
    /// # Safety
    /// The caller must guarantee interrupts are actually disabled for the
    /// lifetime of the returned token. Only [`with_irqs_disabled`] and
    /// platform ISR entry points should call this.
    #[inline]
    pub unsafe fn assume_irqs_disabled() -> Self {
        CriticalSection(())
    }
}

/// Run `f` with interrupts disabled, matching `irq_save()` / `irq_restore()`
/// around a critical section, grounded on the retrieved kernel's
/// `x86_64::instructions::interrupts::without_interrupts` usage throughout
/// `task/scheduler.rs` and `task/executor.rs`.
#[inline]
pub fn with_irqs_disabled<P: Platform, R>(platform: &P, f: impl FnOnce(&CriticalSection) -> R) -> R {
    let state = platform.irq_save();
    // Safety: irq_save() just disabled interrupts for us.
    let cs = unsafe { CriticalSection::assume_irqs_disabled() };
    let result = f(&cs);
    platform.irq_restore(state);
    result
}

/// The three host-visible message shapes the scheduler ever emits, carried
/// as a typed payload instead of a pre-formatted string so `Platform::send`
/// implementations don't need to parse scheduler output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMessage {
    Starting,
    Shutdown { clock: u32, reason_id: u16 },
    IsShutdown { reason_id: u16 },
}

impl fmt::Display for HostMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HostMessage::Starting => write!(f, "starting"),
            HostMessage::Shutdown { clock, reason_id } => {
                write!(f, "shutdown clock={clock} static_string_id={reason_id}")
            }
            HostMessage::IsShutdown { reason_id } => {
                write!(f, "is_shutdown static_string_id={reason_id}")
            }
        }
    }
}

/// Host-platform services required by the scheduler core. See SPEC_FULL.md
/// §6 for the contract each method must satisfy.
pub trait Platform {
    type IrqState: IrqState;

    /// Ticks since an arbitrary epoch. Wrap-safe — see [`crate::time`].
    fn now(&self) -> u32;

    /// Request an immediate re-evaluation of the next hardware deadline,
    /// used when a foreground `add` displaces the current head.
    fn kick_hardware_timer(&self);

    /// Disable interrupts, returning a token that restores the previous
    /// state on [`Platform::irq_restore`]. Must nest correctly if the
    /// platform supports nested critical sections.
    fn irq_save(&self) -> Self::IrqState;
    fn irq_restore(&self, state: Self::IrqState);

    fn irq_disable(&self);
    fn irq_enable(&self);

    /// Sleep the CPU until the next interrupt. Must return promptly once an
    /// interrupt (of any kind) has been taken, even if it turns out nothing
    /// changed `tasks_status` — the foreground loop re-checks.
    fn irq_wait(&self);

    /// Poll for platform "interrupts" routed as software events, on hosts
    /// where hardware IRQs are not available (e.g. a simulator). Also the
    /// point at which an ISR-originated shutdown request is observed by the
    /// foreground loop (see [`crate::shutdown`]).
    fn irq_poll(&self);

    /// Convert a microsecond duration to ticks at this platform's
    /// `CLOCK_FREQ`. See [`crate::time::ticks_from_us`].
    fn ticks_from_us(&self, us: u32) -> u32;

    /// Run every registered init-time callback, in link order.
    fn run_init_chain(&self);
    /// Run the fixed-order foreground task callback chain once.
    fn run_task_chain(&self);
    /// Run every registered shutdown handler, in link order.
    fn run_shutdown_chain(&self);

    /// Emit a host-visible message over the transport layer.
    fn send(&self, message: HostMessage);
}
