//! # Valet Channels
//! Telegram Bot API client (the gateway the lifecycle manager connects) and
//! the inbound command router.

pub mod commands;
pub mod telegram;

pub use commands::CommandRouter;
pub use telegram::{TelegramApi, spawn_polling};
