//! Inbound command router for the stateful bot commands.
//!
//! The thin HTTP-wrapper commands (translate, weather, currency, QR,
//! shorten) are intentionally absent — they carry no state or failure
//! policy worth hosting here.

use std::sync::Arc;

use valet_core::error::Result;
use valet_core::types::KeywordKind;
use valet_db::SqliteStore;
use valet_scheduler::feed::FeedFetcher;
use valet_scheduler::timeparse::{self, TzdbClock};

use crate::telegram::{TelegramApi, TelegramMessage};

const COMMON_TIMEZONES: &[&str] = &[
    "Asia/Shanghai",
    "Asia/Hong_Kong",
    "Asia/Taipei",
    "Asia/Tokyo",
    "Asia/Seoul",
    "Asia/Singapore",
    "Europe/London",
    "Europe/Paris",
    "America/New_York",
    "America/Los_Angeles",
    "UTC",
];

const HELP_TEXT: &str = "🤖 *Valet*\n\n\
⏰ *Reminders*\n\
`/remind 10:00 standup` — at a wall-clock time\n\
`/remind 30m tea` — countdown (m/h/d)\n\
`/remind 12-25 10:00 gifts` — on a date\n\
`/reminders` — list pending\n\
`/delremind <id>` — delete\n\
`/settimezone <zone>` — set your timezone\n\
`/mytimezone` — show it\n\n\
📝 *Notes*\n\
`/note <text>` | `/notes` | `/delnote <id>` | `/clearnotes`\n\n\
📰 *Feeds*\n\
`/rss add <url>` | `/rss list` | `/rss del <id>`\n\
`/rss interval <minutes>` — poll period\n\
`/rss kw add w1,w2` — include keywords\n\
`/rss ex add w1,w2` — exclude keywords\n\n\
`/id` — show user/chat ids";

/// Split `/cmd@bot arg1 arg2…` into the command name and the argument rest.
fn parse_command(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    let body = text.strip_prefix('/')?;
    let (head, rest) = match body.split_once(char::is_whitespace) {
        Some((h, r)) => (h, r.trim()),
        None => (body, ""),
    };
    let cmd = head.split('@').next().unwrap_or(head);
    if cmd.is_empty() {
        return None;
    }
    Some((cmd, rest))
}

/// Routes parsed commands to the store and replies through the gateway.
pub struct CommandRouter {
    api: Arc<TelegramApi>,
    store: Arc<SqliteStore>,
    fetcher: Arc<dyn FeedFetcher>,
    /// When set, only this Telegram user id may issue commands.
    admin_id: Option<i64>,
}

impl CommandRouter {
    pub fn new(
        api: Arc<TelegramApi>,
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn FeedFetcher>,
        admin_id: Option<i64>,
    ) -> Self {
        Self {
            api,
            store,
            fetcher,
            admin_id,
        }
    }

    pub async fn handle(&self, msg: &TelegramMessage) -> Result<()> {
        let Some(text) = msg.text.as_deref() else {
            return Ok(());
        };
        let Some(from) = msg.from.as_ref() else {
            return Ok(());
        };
        if from.is_bot {
            return Ok(());
        }
        let Some((cmd, rest)) = parse_command(text) else {
            return Ok(());
        };
        let chat_id = msg.chat.id;
        let user_id = from.id.to_string();

        // /id stays open so users can discover the id to configure.
        if let Some(admin) = self.admin_id
            && from.id != admin
            && cmd != "id"
        {
            return Ok(());
        }

        match cmd {
            "start" => {
                self.reply(
                    chat_id,
                    &format!(
                        "👋 Hi {}! I keep reminders, notes, and feed subscriptions.\n\nSend /help for the full command list.",
                        from.first_name
                    ),
                )
                .await
            }
            "help" => self.reply(chat_id, HELP_TEXT).await,
            "id" => self.cmd_id(msg, chat_id).await,
            "remind" => self.cmd_remind(&user_id, chat_id, rest).await,
            "reminders" => self.cmd_reminders(&user_id, chat_id).await,
            "delremind" => self.cmd_delremind(&user_id, chat_id, rest).await,
            "note" => self.cmd_note(&user_id, chat_id, rest).await,
            "notes" => self.cmd_notes(&user_id, chat_id).await,
            "delnote" => self.cmd_delnote(&user_id, chat_id, rest).await,
            "clearnotes" => {
                let n = self.store.clear_notes(&user_id)?;
                self.reply(chat_id, &format!("✅ Cleared {n} note(s)")).await
            }
            "settimezone" => self.cmd_settimezone(&user_id, chat_id, rest).await,
            "mytimezone" => self.cmd_mytimezone(&user_id, chat_id).await,
            "rss" => self.cmd_rss(&user_id, chat_id, rest).await,
            _ => Ok(()),
        }
    }

    async fn reply(&self, chat_id: i64, text: &str) -> Result<()> {
        self.api.send(chat_id, text).await
    }

    async fn cmd_id(&self, msg: &TelegramMessage, chat_id: i64) -> Result<()> {
        let Some(from) = msg.from.as_ref() else {
            return Ok(());
        };
        let mut out = format!(
            "👤 *User*\n├ id: `{}`\n├ username: {}\n└ name: {}{}\n\n💬 *Chat*\n├ id: `{}`\n└ type: {}",
            from.id,
            from.username
                .as_deref()
                .map(|u| format!("@{u}"))
                .unwrap_or_else(|| "—".into()),
            from.first_name,
            from.last_name
                .as_deref()
                .map(|l| format!(" {l}"))
                .unwrap_or_default(),
            msg.chat.id,
            msg.chat.chat_type,
        );
        if let Some(title) = &msg.chat.title {
            out.push_str(&format!("\n└ title: {title}"));
        }
        self.reply(chat_id, &out).await
    }

    async fn cmd_remind(&self, user_id: &str, chat_id: i64, rest: &str) -> Result<()> {
        // The date-time form is two tokens ("12-25 10:00"); try consuming
        // two tokens as the time expression first, then one.
        let tokens: Vec<&str> = rest.split_whitespace().collect();
        if tokens.len() < 2 {
            return self
                .reply(
                    chat_id,
                    "❌ Usage: /remind <time> <text>\n\nTime formats:\n• `30m`, `2h`, `1d`\n• `10:00` — today or tomorrow\n• `12-25 10:00` or `2025-12-25 10:00`\n\nSet your timezone with /settimezone",
                )
                .await;
        }
        let zone = self.store.timezone(user_id)?;
        let now = chrono::Utc::now();
        let clock = TzdbClock;

        let (remind_at, message) = {
            let two = format!("{} {}", tokens[0], tokens[1]);
            if tokens.len() > 2
                && let Some(t) = timeparse::resolve(&two, &zone, now, &clock)
            {
                (Some(t), tokens[2..].join(" "))
            } else {
                (
                    timeparse::resolve(tokens[0], &zone, now, &clock),
                    tokens[1..].join(" "),
                )
            }
        };

        let Some(remind_at) = remind_at else {
            return self
                .reply(chat_id, "❌ Unrecognized time format, see /help")
                .await;
        };
        if remind_at <= now {
            return self
                .reply(chat_id, "❌ The reminder time must be in the future")
                .await;
        }

        let id = self.store.add_reminder(user_id, chat_id, &message, remind_at)?;
        let display = timeparse::format_civil(remind_at, &zone, &clock)
            .unwrap_or_else(|| remind_at.to_rfc3339());
        self.reply(
            chat_id,
            &format!(
                "✅ Reminder set\n\n📅 {display}\n📝 {message}\n🔖 id: {id}\n🕐 zone: {zone}"
            ),
        )
        .await
    }

    async fn cmd_reminders(&self, user_id: &str, chat_id: i64) -> Result<()> {
        let zone = self.store.timezone(user_id)?;
        let clock = TzdbClock;
        let reminders = self.store.list_reminders(user_id)?;
        if reminders.is_empty() {
            return self.reply(chat_id, "📭 No pending reminders").await;
        }
        let list = reminders
            .iter()
            .map(|r| {
                let time = timeparse::format_civil(r.remind_at, &zone, &clock)
                    .unwrap_or_else(|| r.remind_at.to_rfc3339());
                format!("🔖 #{} | {}\n   {}", r.id, time, r.message)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        self.reply(
            chat_id,
            &format!("⏰ *Pending reminders*\n\n{list}\n\nDelete with /delremind <id>"),
        )
        .await
    }

    async fn cmd_delremind(&self, user_id: &str, chat_id: i64, rest: &str) -> Result<()> {
        let Ok(id) = rest.trim().parse::<i64>() else {
            return self.reply(chat_id, "❌ Usage: /delremind <id>").await;
        };
        if self.store.delete_reminder(id, user_id)? {
            self.reply(chat_id, &format!("✅ Reminder #{id} deleted")).await
        } else {
            self.reply(chat_id, &format!("❌ No reminder #{id}")).await
        }
    }

    async fn cmd_note(&self, user_id: &str, chat_id: i64, rest: &str) -> Result<()> {
        if rest.is_empty() {
            return self.reply(chat_id, "❌ Usage: /note <text>").await;
        }
        let id = self.store.add_note(user_id, rest)?;
        self.reply(chat_id, &format!("✅ Note saved (id: {id})\n📝 {rest}"))
            .await
    }

    async fn cmd_notes(&self, user_id: &str, chat_id: i64) -> Result<()> {
        let notes = self.store.list_notes(user_id, 15)?;
        if notes.is_empty() {
            return self.reply(chat_id, "📭 No notes").await;
        }
        let list = notes
            .iter()
            .map(|n| {
                let preview: String = n.content.chars().take(50).collect();
                let ellipsis = if n.content.chars().count() > 50 { "…" } else { "" };
                format!("🔖 #{} | {preview}{ellipsis}", n.id)
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.reply(
            chat_id,
            &format!("📝 *Notes*\n\n{list}\n\nDelete with /delnote <id>"),
        )
        .await
    }

    async fn cmd_delnote(&self, user_id: &str, chat_id: i64, rest: &str) -> Result<()> {
        let Ok(id) = rest.trim().parse::<i64>() else {
            return self.reply(chat_id, "❌ Usage: /delnote <id>").await;
        };
        if self.store.delete_note(id, user_id)? {
            self.reply(chat_id, &format!("✅ Note #{id} deleted")).await
        } else {
            self.reply(chat_id, &format!("❌ No note #{id}")).await
        }
    }

    async fn cmd_settimezone(&self, user_id: &str, chat_id: i64, rest: &str) -> Result<()> {
        let tz = rest.trim();
        if tz.is_empty() {
            let list = COMMON_TIMEZONES
                .iter()
                .map(|t| format!("• `{t}`"))
                .collect::<Vec<_>>()
                .join("\n");
            return self
                .reply(
                    chat_id,
                    &format!("*Set timezone*\n\nUsage: /settimezone <zone>\n\nCommon zones:\n{list}"),
                )
                .await;
        }
        if !timeparse::is_valid_zone(tz) {
            return self
                .reply(chat_id, &format!("❌ Invalid timezone: {tz}"))
                .await;
        }
        self.store.set_timezone(user_id, tz)?;
        let now = timeparse::format_civil(chrono::Utc::now(), tz, &TzdbClock).unwrap_or_default();
        self.reply(
            chat_id,
            &format!("✅ Timezone set to `{tz}`\n\nLocal time now: {now}"),
        )
        .await
    }

    async fn cmd_mytimezone(&self, user_id: &str, chat_id: i64) -> Result<()> {
        let tz = self.store.timezone(user_id)?;
        let now = timeparse::format_civil(chrono::Utc::now(), &tz, &TzdbClock).unwrap_or_default();
        self.reply(
            chat_id,
            &format!("🕐 *Your timezone*\n\nzone: `{tz}`\nlocal time: {now}\n\nChange with /settimezone"),
        )
        .await
    }

    async fn cmd_rss(&self, user_id: &str, chat_id: i64, rest: &str) -> Result<()> {
        let mut args = rest.split_whitespace();
        let action = args.next().unwrap_or("");
        match action {
            "" => {
                let interval = self.store.feed_interval_minutes();
                let kw = self.store.list_keywords(KeywordKind::Include)?;
                let ex = self.store.list_keywords(KeywordKind::Exclude)?;
                self.reply(
                    chat_id,
                    &format!(
                        "📰 *Feed subscriptions*\n\n`/rss add <url>` | `/rss list` | `/rss del <id>`\n`/rss interval <minutes>` (now {interval}m)\n`/rss kw add|del|list` — include keywords\n`/rss ex add|del|list` — exclude keywords\n\n📌 include: {}\n🚫 exclude: {}",
                        if kw.is_empty() { "—".into() } else { kw.join(", ") },
                        if ex.is_empty() { "—".into() } else { ex.join(", ") },
                    ),
                )
                .await
            }
            "add" => {
                let Some(url) = args.next() else {
                    return self.reply(chat_id, "❌ Usage: /rss add <url>").await;
                };
                match self.fetcher.fetch(url).await {
                    Ok(feed) => {
                        self.store.add_feed(user_id, chat_id, url, Some(&feed.title))?;
                        self.reply(chat_id, &format!("✅ Subscribed\n\n📰 {}\n🔗 {url}", feed.title))
                            .await
                    }
                    Err(e) => {
                        self.reply(chat_id, &format!("❌ Could not parse feed: {e}"))
                            .await
                    }
                }
            }
            "list" => {
                let feeds = self.store.list_feeds_for(user_id)?;
                if feeds.is_empty() {
                    return self.reply(chat_id, "📭 No subscriptions").await;
                }
                let list = feeds
                    .iter()
                    .map(|f| {
                        format!(
                            "🔖 #{} | {}\n   {}",
                            f.id,
                            f.title.as_deref().unwrap_or("unknown"),
                            f.url
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n\n");
                self.reply(chat_id, &format!("📰 *Subscriptions*\n\n{list}")).await
            }
            "del" => {
                let Some(Ok(id)) = args.next().map(str::parse::<i64>) else {
                    return self.reply(chat_id, "❌ Usage: /rss del <id>").await;
                };
                if self.store.delete_feed(id, user_id)? {
                    self.reply(chat_id, &format!("✅ Subscription #{id} deleted")).await
                } else {
                    self.reply(chat_id, &format!("❌ No subscription #{id}")).await
                }
            }
            "interval" => {
                let minutes = args.next().and_then(|m| m.parse::<u64>().ok());
                let Some(minutes) = minutes.filter(|m| (1..=1440).contains(m)) else {
                    return self
                        .reply(chat_id, "❌ Usage: /rss interval <minutes> (1–1440)")
                        .await;
                };
                self.store.set_feed_interval_minutes(minutes)?;
                self.reply(
                    chat_id,
                    &format!("✅ Poll interval set to {minutes} minute(s)\n⚠️ Applies after the bot restarts"),
                )
                .await
            }
            "kw" => {
                let sub = args.next().unwrap_or("");
                let input = args.collect::<Vec<_>>().join(" ");
                self.keyword_action(chat_id, KeywordKind::Include, sub, &input)
                    .await
            }
            "ex" => {
                let sub = args.next().unwrap_or("");
                let input = args.collect::<Vec<_>>().join(" ");
                self.keyword_action(chat_id, KeywordKind::Exclude, sub, &input)
                    .await
            }
            _ => self.reply(chat_id, "❌ Unknown /rss action").await,
        }
    }

    async fn keyword_action(
        &self,
        chat_id: i64,
        kind: KeywordKind,
        sub: &str,
        input: &str,
    ) -> Result<()> {
        let label = match kind {
            KeywordKind::Include => "keyword",
            KeywordKind::Exclude => "exclude word",
        };
        let words: Vec<String> = input
            .split(',')
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty())
            .collect();
        match sub {
            "add" if !words.is_empty() => {
                let mut added = Vec::new();
                for w in &words {
                    if self.store.add_keyword(w, kind)? {
                        added.push(w.as_str());
                    }
                }
                if added.is_empty() {
                    self.reply(chat_id, &format!("⚠️ {label}(s) already present")).await
                } else {
                    self.reply(chat_id, &format!("✅ Added {label}(s): {}", added.join(", ")))
                        .await
                }
            }
            "del" if !words.is_empty() => {
                let mut deleted = Vec::new();
                for w in &words {
                    if self.store.delete_keyword(w, kind)? {
                        deleted.push(w.as_str());
                    }
                }
                if deleted.is_empty() {
                    self.reply(chat_id, &format!("❌ No matching {label}")).await
                } else {
                    self.reply(chat_id, &format!("✅ Deleted {label}(s): {}", deleted.join(", ")))
                        .await
                }
            }
            "list" => {
                let list = self.store.list_keywords(kind)?;
                let body = if list.is_empty() { "—".into() } else { list.join("\n") };
                self.reply(chat_id, &format!("📌 *{label} list*\n\n{body}")).await
            }
            _ => {
                let flag = match kind {
                    KeywordKind::Include => "kw",
                    KeywordKind::Exclude => "ex",
                };
                self.reply(
                    chat_id,
                    &format!("❌ Usage:\n/rss {flag} add w1,w2\n/rss {flag} del w1,w2\n/rss {flag} list"),
                )
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_commands() {
        assert_eq!(parse_command("/help"), Some(("help", "")));
        assert_eq!(parse_command("/remind 30m tea"), Some(("remind", "30m tea")));
        assert_eq!(
            parse_command("/rss add https://x"),
            Some(("rss", "add https://x"))
        );
    }

    #[test]
    fn strips_bot_mention() {
        assert_eq!(parse_command("/help@valet_bot"), Some(("help", "")));
        assert_eq!(
            parse_command("/remind@valet_bot 10:00 standup"),
            Some(("remind", "10:00 standup"))
        );
    }

    #[test]
    fn ignores_non_commands() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
        assert_eq!(parse_command(""), None);
    }
}
