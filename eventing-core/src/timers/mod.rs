//! Deferred callbacks keyed by `(document key, callback id)`.
//!
//! Timers live in memory only and are lost on restart.

pub mod clock;
pub mod driver;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use driver::{DEFAULT_TICK, TimerDriver, TimerSink};
pub use registry::{CallbackId, Registration, TimerEntry, TimerRegistry};
