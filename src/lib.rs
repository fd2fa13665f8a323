//! Cooperative real-time scheduler core for a microcontroller-class firmware
//! host. Multiplexes software timers dispatched from a hardware-timer
//! interrupt with background tasks polled from a foreground loop, and
//! provides a synchronous emergency-shutdown path from any context.
//!
//! The core is generic over a single [`platform::Platform`] trait standing
//! in for the hardware-timer driver, IRQ primitives, host transport, and the
//! init/task/shutdown registries — see that trait for the full contract.
//! Bring your own board support; this crate never touches real hardware.
#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod platform;
pub mod scheduler;
pub mod shutdown;
pub mod time;
pub mod timer;
pub mod wake;

pub use config::{ReservedReasonIds, SchedConfig};
pub use platform::{CriticalSection, HostMessage, Platform};
pub use scheduler::{sched_main, Scheduler};
pub use shutdown::ShutdownRequested;
pub use timer::{CallbackResult, Timer, TimerFn};
pub use wake::WakeFlag;
