//! # Valet Scheduler
//!
//! The periodic half of the bot: a one-minute reminder sweep and a
//! configurable feed poll, both driven by tokio intervals and armed only
//! while the bot lifecycle is in its running state.
//!
//! ```text
//! SchedulerHandle (armed by the lifecycle manager)
//!   ├── reminder sweep (60s)  → DispatchStore.due_reminders → GatewaySender
//!   └── feed poll (N min)     → FeedFetcher → keyword filter → GatewaySender
//!                                └── cursor advances on deliver or filter veto
//! ```
//!
//! Delivery is at-least-once: a reminder is marked sent only after the
//! gateway accepted it, so a crash between send and mark can duplicate one
//! delivery on restart. That window is deliberate — closing it would need a
//! transactional send+mark the gateway cannot offer.

pub mod feed;
pub mod sweep;
pub mod timeparse;

pub use feed::{FeedFetcher, FeedItem, HttpFeedFetcher, ParsedFeed, title_passes};
pub use sweep::{Scheduler, SchedulerHandle};
pub use timeparse::{CivilClock, CivilTime, TzdbClock, format_civil, resolve};
