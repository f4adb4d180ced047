//! Telegram Bot API client — long polling + message sending.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use valet_core::error::{Result, ValetError};
use valet_core::traits::{GatewayLink, GatewaySender};

use crate::commands::CommandRouter;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bot API client. Cheap to share behind an `Arc`; the polling cursor is
/// atomic so `get_updates` works through a shared reference.
pub struct TelegramApi {
    token: String,
    api_base: String,
    client: reqwest::Client,
    last_update_id: AtomicI64,
}

impl TelegramApi {
    /// `api_base` overrides the public Bot API endpoint (self-hosted
    /// bot-api servers); empty string means the default.
    pub fn new(token: impl Into<String>, api_base: &str) -> Self {
        let api_base = if api_base.is_empty() {
            DEFAULT_API_BASE.to_string()
        } else {
            api_base.trim_end_matches('/').to_string()
        };
        Self {
            token: token.into(),
            api_base,
            client: reqwest::Client::new(),
            last_update_id: AtomicI64::new(0),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// Get bot info. Doubles as the connect probe.
    pub async fn get_me(&self) -> Result<TelegramUser> {
        let response = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ValetError::Channel(format!("getMe failed: {e}")))?;
        let body: TelegramApiResponse<TelegramUser> = response
            .json()
            .await
            .map_err(|e| ValetError::Channel(format!("Invalid getMe response: {e}")))?;
        if !body.ok {
            return Err(ValetError::Channel(format!(
                "getMe rejected: {}",
                body.description.unwrap_or_default()
            )));
        }
        body.result
            .ok_or_else(|| ValetError::Channel("No bot info".into()))
    }

    /// Get updates using long polling, advancing the internal offset.
    pub async fn get_updates(&self) -> Result<Vec<TelegramUpdate>> {
        let offset = self.last_update_id.load(Ordering::SeqCst) + 1;
        let response = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", "30".into()),
                ("allowed_updates", "[\"message\"]".into()),
            ])
            .send()
            .await
            .map_err(|e| ValetError::Channel(format!("getUpdates failed: {e}")))?;

        let body: TelegramApiResponse<Vec<TelegramUpdate>> = response
            .json()
            .await
            .map_err(|e| ValetError::Channel(format!("Invalid updates response: {e}")))?;

        if !body.ok {
            return Err(ValetError::Channel(format!(
                "Telegram API error: {}",
                body.description.unwrap_or_default()
            )));
        }

        let updates = body.result.unwrap_or_default();
        if let Some(last) = updates.last() {
            self.last_update_id.store(last.update_id, Ordering::SeqCst);
        }
        Ok(updates)
    }

    /// Send a Markdown message.
    pub async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ValetError::Channel(format!("sendMessage failed: {e}")))?;

        let result: TelegramApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| ValetError::Channel(format!("Invalid send response: {e}")))?;

        if !result.ok {
            return Err(ValetError::Channel(format!(
                "Send failed: {}",
                result.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl GatewaySender for TelegramApi {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send(chat_id, text).await
    }
}

#[async_trait]
impl GatewayLink for TelegramApi {
    async fn connect(&self) -> Result<()> {
        let me = self.get_me().await?;
        tracing::info!(
            "Telegram bot: @{} ({})",
            me.username.as_deref().unwrap_or("unknown"),
            me.first_name
        );
        Ok(())
    }

    async fn disconnect(&self) {
        // Long polling holds no connection state; the lifecycle manager
        // aborts the polling loop on teardown.
    }
}

/// Spawn the update-polling loop, dispatching every message to the command
/// router. The returned handle is aborted by the lifecycle manager on stop.
pub fn spawn_polling(
    api: Arc<TelegramApi>,
    router: Arc<CommandRouter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Telegram polling loop started");
        loop {
            match api.get_updates().await {
                Ok(updates) => {
                    for update in updates {
                        let Some(msg) = update.message else { continue };
                        if let Err(e) = router.handle(&msg).await {
                            tracing::warn!("Command handling failed: {e}");
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Telegram polling error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    })
}

// --- Telegram API Types ---

#[derive(Debug, Deserialize)]
pub struct TelegramApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub text: Option<String>,
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
    pub username: Option<String>,
}
