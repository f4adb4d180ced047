//! Capability traits consumed by the scheduling core.
//!
//! The scheduler, lifecycle manager, and command router depend on these
//! interfaces only — the Telegram client and the sqlite store implement
//! them, and tests substitute mocks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{FeedSubscription, KeywordKind, Reminder};

/// Outbound message delivery to the messaging gateway.
#[async_trait]
pub trait GatewaySender: Send + Sync {
    /// Send a Markdown-formatted message to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// The long-lived gateway connection managed by the lifecycle state machine.
#[async_trait]
pub trait GatewayLink: Send + Sync {
    /// Establish the connection. Failures are retryable.
    async fn connect(&self) -> Result<()>;

    /// Release the connection. Must not fail teardown.
    async fn disconnect(&self);
}

/// Store operations the scheduler's sweep loops need.
#[async_trait]
pub trait DispatchStore: Send + Sync {
    /// Reminders with `sent = false` and `remind_at <= now`.
    async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>>;

    /// Mark a reminder delivered. Terminal: the record never comes due again.
    async fn mark_sent(&self, id: i64) -> Result<()>;

    /// All feed subscriptions, across users.
    async fn list_feeds(&self) -> Result<Vec<FeedSubscription>>;

    /// Overwrite a subscription's cursor with the newest examined item id.
    async fn advance_cursor(&self, feed_id: i64, item_id: &str) -> Result<()>;

    /// Global keyword rules of one kind.
    async fn keywords(&self, kind: KeywordKind) -> Result<Vec<String>>;
}

/// Read-only runtime settings the scheduler and gateway wiring consult.
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Feed poll period in minutes.
    async fn feed_poll_minutes(&self) -> u64;

    /// Bot API endpoint override, when one was stored at runtime.
    async fn api_base_override(&self) -> Option<String>;
}
