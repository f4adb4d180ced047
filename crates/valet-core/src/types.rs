//! Data types shared across the workspace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A scheduled reminder. Created by a user command; only the scheduler
/// flips `sent`. Once `sent` is true the record is terminal — the sweep
/// query must never pick it up again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: i64,
    pub user_id: String,
    pub chat_id: i64,
    pub message: String,
    pub remind_at: DateTime<Utc>,
    pub sent: bool,
}

/// A saved note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// An RSS feed subscription. `last_item_id` is the cursor: the identifier
/// of the most recently *settled* item — one that was delivered or vetoed
/// by a keyword rule. A failed delivery leaves the cursor in place so the
/// item is retried on the next poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSubscription {
    pub id: i64,
    pub user_id: String,
    pub chat_id: i64,
    pub url: String,
    pub title: Option<String>,
    pub last_item_id: Option<String>,
}

/// Keyword rule kind. Exclude rules are checked first and veto delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordKind {
    Include,
    Exclude,
}

impl KeywordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordKind::Include => "include",
            KeywordKind::Exclude => "exclude",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "include" => Some(KeywordKind::Include),
            "exclude" => Some(KeywordKind::Exclude),
            _ => None,
        }
    }
}

/// Bot lifecycle status as reported to the admin API.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BotStatus {
    pub running: bool,
    pub starting: bool,
}

/// Supervised worker process status as reported to the admin API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub url: String,
    pub port: Option<u16>,
}
