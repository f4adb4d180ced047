//! # Valet Runtime
//! The two process-wide singletons: the bot lifecycle state machine
//! (gateway connect/disconnect with idempotent, coalescing start/stop) and
//! the worker process supervisor (download, launch, monitor, terminate).

pub mod lifecycle;
pub mod supervisor;

pub use lifecycle::{ArmFn, Armed, BotLifecycle, RetryPolicy};
pub use supervisor::{PidProbe, SignalProbe, WorkerSupervisor};
