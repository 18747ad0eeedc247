//! Core timing substrate for cycle-accurate emulation.
//!
//! Each emulated processor owns a clock domain ([`Scheduler`]). Peripheral
//! chips living in that domain never poll: they arm alarms for the cycle at
//! which something will happen, raise requests on the domain's merged
//! interrupt lines, and rebase their stored clocks when the domain clock is
//! wound back by the overflow guard.

mod alarm;
mod clock;
mod interrupt;
mod scheduler;
pub mod snapshot;

pub use alarm::{AlarmContext, AlarmHandler, AlarmId};
pub use clock::{Clock, ClockGuard, ClockRebase, DEFAULT_HEADROOM, DEFAULT_KEEP, rebase_clock};
pub use interrupt::{InterruptKind, InterruptSource, InterruptStatus};
pub use scheduler::Scheduler;
pub use snapshot::{ModuleReader, ModuleWriter, SnapshotError, SnapshotResult};
