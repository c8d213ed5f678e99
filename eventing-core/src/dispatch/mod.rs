//! Per-key event dispatch.

pub mod dispatcher;
pub mod handler;
pub mod outcome;
pub mod sink;

pub use dispatcher::{DispatchTicket, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use handler::{CallbackRegistry, EventHandler, HandlerChain, HandlerContext, TimerCallback};
pub use outcome::{DispatchStats, EventOutcome, OutcomeBus, OutcomeStatus, StatsSnapshot};
pub use sink::{ErrorSink, Failure, RecentFailures, TracingSink};
