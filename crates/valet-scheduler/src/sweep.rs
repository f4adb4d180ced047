//! The two periodic loops: reminder sweep and feed poll.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use valet_core::error::Result;
use valet_core::traits::{DispatchStore, GatewaySender};
use valet_core::types::KeywordKind;

use crate::feed::{FeedFetcher, title_passes};

/// Period of the reminder sweep. Fixed; feed polling is configurable.
pub const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Owns the store, sender, and fetcher capabilities and performs one tick of
/// each loop. Ticks run sequentially per loop — a later tick never starts
/// before the previous one finished — and every item failure is local to
/// that item.
pub struct Scheduler {
    store: Arc<dyn DispatchStore>,
    sender: Arc<dyn GatewaySender>,
    fetcher: Arc<dyn FeedFetcher>,
    /// Static keyword rules from the config file, merged with the
    /// store-managed rules on every poll.
    config_includes: Vec<String>,
    config_excludes: Vec<String>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn DispatchStore>,
        sender: Arc<dyn GatewaySender>,
        fetcher: Arc<dyn FeedFetcher>,
    ) -> Self {
        Self {
            store,
            sender,
            fetcher,
            config_includes: Vec::new(),
            config_excludes: Vec::new(),
        }
    }

    pub fn with_config_rules(mut self, includes: Vec<String>, excludes: Vec<String>) -> Self {
        self.config_includes = includes;
        self.config_excludes = excludes;
        self
    }

    /// One reminder sweep: deliver everything due, mark only what was
    /// actually accepted by the gateway. Failed sends stay unmarked and come
    /// due again next tick (at-least-once).
    pub async fn sweep_reminders(&self) -> Result<usize> {
        let due = self.store.due_reminders(Utc::now()).await?;
        let mut delivered = 0;
        for reminder in due {
            let text = format!("⏰ *Reminder*\n\n📝 {}", reminder.message);
            match self.sender.send_message(reminder.chat_id, &text).await {
                Ok(()) => {
                    delivered += 1;
                    if let Err(e) = self.store.mark_sent(reminder.id).await {
                        tracing::warn!(
                            "Reminder {} delivered but not marked, may repeat: {e}",
                            reminder.id
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Reminder {} delivery failed, will retry next sweep: {e}",
                        reminder.id
                    );
                }
            }
        }
        Ok(delivered)
    }

    /// One feed poll: for each subscription, look at the newest item; when
    /// its id differs from the cursor, filter by keywords and deliver on a
    /// pass. The cursor advances after a successful send and on a filter
    /// veto — a filtered item must not replay after a later rule change —
    /// but a failed send leaves it untouched so the item comes around
    /// again on the next poll.
    pub async fn poll_feeds(&self) -> Result<usize> {
        let feeds = self.store.list_feeds().await?;
        let mut delivered = 0;
        for feed in feeds {
            let parsed = match self.fetcher.fetch(&feed.url).await {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("Feed {} ({}) fetch failed: {e}", feed.id, feed.url);
                    continue;
                }
            };
            let Some(newest) = parsed.items.first() else {
                continue;
            };
            if feed.last_item_id.as_deref() == Some(newest.guid.as_str()) {
                continue;
            }

            let (includes, excludes) = match self.keyword_rules().await {
                Ok(rules) => rules,
                Err(e) => {
                    tracing::warn!(
                        "Keyword rules unavailable, feed {} left for retry: {e}",
                        feed.id
                    );
                    continue;
                }
            };
            if title_passes(&newest.title, &includes, &excludes) {
                let feed_title = feed.title.as_deref().unwrap_or(&parsed.title);
                let text = format!(
                    "📰 *{}*\n\n📄 {}\n🔗 {}",
                    feed_title, newest.title, newest.link
                );
                match self.sender.send_message(feed.chat_id, &text).await {
                    Ok(()) => {
                        delivered += 1;
                        self.advance(feed.id, &newest.guid).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Feed {} delivery failed, will retry next poll: {e}",
                            feed.id
                        );
                    }
                }
            } else {
                self.advance(feed.id, &newest.guid).await;
            }
        }
        Ok(delivered)
    }

    /// Store-managed rules merged with the static config rules.
    async fn keyword_rules(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut includes = self.store.keywords(KeywordKind::Include).await?;
        includes.extend(self.config_includes.iter().cloned());
        let mut excludes = self.store.keywords(KeywordKind::Exclude).await?;
        excludes.extend(self.config_excludes.iter().cloned());
        Ok((includes, excludes))
    }

    async fn advance(&self, feed_id: i64, item_id: &str) {
        if let Err(e) = self.store.advance_cursor(feed_id, item_id).await {
            tracing::warn!("Feed {feed_id} cursor update failed: {e}");
        }
    }
}

/// Abort handles for the armed loops. Dropping does not stop them; the
/// lifecycle manager calls [`SchedulerHandle::disarm`] on teardown.
pub struct SchedulerHandle {
    reminders: JoinHandle<()>,
    feeds: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop future ticks. An in-flight tick is not interrupted mid-await by
    /// design intent; aborting at the next suspension point is acceptable
    /// because every store write is already durable.
    pub fn disarm(&self) {
        self.reminders.abort();
        self.feeds.abort();
    }
}

/// Spawn both loops. Called by the lifecycle manager on entering Running.
pub fn arm(scheduler: Arc<Scheduler>, feed_poll_minutes: u64) -> SchedulerHandle {
    let feed_period = Duration::from_secs(feed_poll_minutes.max(1) * 60);
    tracing::info!(
        "⏰ Scheduler armed (reminders every 60s, feeds every {}m)",
        feed_poll_minutes.max(1)
    );

    let s = scheduler.clone();
    let reminders = tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_PERIOD);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // immediate first tick
        loop {
            if let Err(e) = s.sweep_reminders().await {
                tracing::warn!("Reminder sweep failed: {e}");
            }
            interval.tick().await;
        }
    });

    let s = scheduler;
    let feeds = tokio::spawn(async move {
        let mut interval = tokio::time::interval(feed_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            if let Err(e) = s.poll_feeds().await {
                tracing::warn!("Feed poll failed: {e}");
            }
            interval.tick().await;
        }
    });

    SchedulerHandle { reminders, feeds }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::sync::Mutex;
    use valet_core::error::ValetError;
    use valet_core::types::{FeedSubscription, Reminder};

    use crate::feed::{FeedItem, ParsedFeed};

    #[derive(Default)]
    struct MockStore {
        reminders: Mutex<Vec<Reminder>>,
        feeds: Mutex<Vec<FeedSubscription>>,
        includes: Mutex<Vec<String>>,
        excludes: Mutex<Vec<String>>,
        fail_mark: std::sync::atomic::AtomicBool,
        fail_keywords: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl DispatchStore for MockStore {
        async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
            Ok(self
                .reminders
                .lock()
                .unwrap()
                .iter()
                .filter(|r| !r.sent && r.remind_at <= now)
                .cloned()
                .collect())
        }

        async fn mark_sent(&self, id: i64) -> Result<()> {
            if self.fail_mark.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ValetError::Store("disk full".into()));
            }
            for r in self.reminders.lock().unwrap().iter_mut() {
                if r.id == id {
                    r.sent = true;
                }
            }
            Ok(())
        }

        async fn list_feeds(&self) -> Result<Vec<FeedSubscription>> {
            Ok(self.feeds.lock().unwrap().clone())
        }

        async fn advance_cursor(&self, feed_id: i64, item_id: &str) -> Result<()> {
            for f in self.feeds.lock().unwrap().iter_mut() {
                if f.id == feed_id {
                    f.last_item_id = Some(item_id.to_string());
                }
            }
            Ok(())
        }

        async fn keywords(&self, kind: KeywordKind) -> Result<Vec<String>> {
            if self.fail_keywords.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ValetError::Store("disk full".into()));
            }
            Ok(match kind {
                KeywordKind::Include => self.includes.lock().unwrap().clone(),
                KeywordKind::Exclude => self.excludes.lock().unwrap().clone(),
            })
        }
    }

    #[derive(Default)]
    struct MockSender {
        sent: Mutex<Vec<(i64, String)>>,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl GatewaySender for MockSender {
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
            if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(ValetError::Channel("down".into()));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    struct MockFetcher {
        feeds: Mutex<std::collections::HashMap<String, ParsedFeed>>,
    }

    impl MockFetcher {
        fn with(url: &str, feed: ParsedFeed) -> Self {
            let mut map = std::collections::HashMap::new();
            map.insert(url.to_string(), feed);
            Self {
                feeds: Mutex::new(map),
            }
        }
    }

    #[async_trait]
    impl FeedFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
            self.feeds
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| ValetError::Feed("unreachable".into()))
        }
    }

    fn reminder(id: i64, secs_ago: i64) -> Reminder {
        Reminder {
            id,
            user_id: "u".into(),
            chat_id: 7,
            message: format!("task {id}"),
            remind_at: Utc::now() - ChronoDuration::seconds(secs_ago),
            sent: false,
        }
    }

    fn subscription(id: i64, url: &str, cursor: Option<&str>) -> FeedSubscription {
        FeedSubscription {
            id,
            user_id: "u".into(),
            chat_id: 9,
            url: url.into(),
            title: Some("Feed".into()),
            last_item_id: cursor.map(str::to_string),
        }
    }

    fn one_item_feed(guid: &str, title: &str) -> ParsedFeed {
        ParsedFeed {
            title: "Feed".into(),
            items: vec![FeedItem {
                title: title.into(),
                link: "https://example.com/x".into(),
                guid: guid.into(),
            }],
        }
    }

    #[tokio::test]
    async fn sweep_delivers_once_and_never_twice() {
        let store = Arc::new(MockStore::default());
        store.reminders.lock().unwrap().push(reminder(1, 1));
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("x", one_item_feed("g", "t")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        assert_eq!(sched.sweep_reminders().await.unwrap(), 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);

        // second tick: already marked, nothing delivered
        assert_eq!(sched.sweep_reminders().await.unwrap(), 0);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_stays_due_for_retry() {
        let store = Arc::new(MockStore::default());
        store.reminders.lock().unwrap().push(reminder(1, 1));
        let sender = Arc::new(MockSender::default());
        sender.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let fetcher = Arc::new(MockFetcher::with("x", one_item_feed("g", "t")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        assert_eq!(sched.sweep_reminders().await.unwrap(), 0);
        assert!(!store.reminders.lock().unwrap()[0].sent);

        // gateway back up → delivered on the next tick
        sender.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(sched.sweep_reminders().await.unwrap(), 1);
        assert!(store.reminders.lock().unwrap()[0].sent);
    }

    #[tokio::test]
    async fn excluded_item_advances_cursor_without_send() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://f", Some("old")));
        store.excludes.lock().unwrap().push("beta".into());
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("http://f", one_item_feed("new", "Rust beta")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        assert_eq!(sched.poll_feeds().await.unwrap(), 0);
        assert!(sender.sent.lock().unwrap().is_empty());
        assert_eq!(
            store.feeds.lock().unwrap()[0].last_item_id.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn no_rules_delivers_any_new_item() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://f", None));
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("http://f", one_item_feed("g1", "Anything")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        assert_eq!(sched.poll_feeds().await.unwrap(), 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);

        // unchanged newest item → quiet next tick
        assert_eq!(sched.poll_feeds().await.unwrap(), 0);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_feed_send_leaves_cursor_for_retry() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://f", Some("old")));
        let sender = Arc::new(MockSender::default());
        sender.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let fetcher = Arc::new(MockFetcher::with("http://f", one_item_feed("new", "Fresh item")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        // gateway down: nothing delivered, cursor stays put
        assert_eq!(sched.poll_feeds().await.unwrap(), 0);
        assert_eq!(
            store.feeds.lock().unwrap()[0].last_item_id.as_deref(),
            Some("old")
        );

        // gateway back up → the same item goes out and the cursor moves
        sender.fail.store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(sched.poll_feeds().await.unwrap(), 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
        assert_eq!(
            store.feeds.lock().unwrap()[0].last_item_id.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn config_exclude_vetoes_without_stored_rules() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://f", Some("old")));
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("http://f", one_item_feed("new", "Rust beta")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher)
            .with_config_rules(vec![], vec!["beta".into()]);

        assert_eq!(sched.poll_feeds().await.unwrap(), 0);
        assert!(sender.sent.lock().unwrap().is_empty());
        assert_eq!(
            store.feeds.lock().unwrap()[0].last_item_id.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn config_include_widens_the_stored_set() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://f", None));
        store.includes.lock().unwrap().push("rust".into());
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with(
            "http://f",
            one_item_feed("g1", "Go 1.24 released"),
        ));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher)
            .with_config_rules(vec!["go".into()], vec![]);

        assert_eq!(sched.poll_feeds().await.unwrap(), 1);
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_failure_does_not_abort_the_sweep() {
        let store = Arc::new(MockStore::default());
        store.reminders.lock().unwrap().push(reminder(1, 2));
        store.reminders.lock().unwrap().push(reminder(2, 1));
        store
            .fail_mark
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("x", one_item_feed("g", "t")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        // both reminders go out even though neither could be marked
        assert_eq!(sched.sweep_reminders().await.unwrap(), 2);
        assert_eq!(sender.sent.lock().unwrap().len(), 2);
        assert!(store.reminders.lock().unwrap().iter().all(|r| !r.sent));
    }

    #[tokio::test]
    async fn keyword_lookup_failure_leaves_feed_for_retry() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://f", Some("old")));
        store
            .fail_keywords
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("http://f", one_item_feed("new", "Fresh item")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        // rules unreadable: the tick still completes, nothing moves
        assert_eq!(sched.poll_feeds().await.unwrap(), 0);
        assert!(sender.sent.lock().unwrap().is_empty());
        assert_eq!(
            store.feeds.lock().unwrap()[0].last_item_id.as_deref(),
            Some("old")
        );

        store
            .fail_keywords
            .store(false, std::sync::atomic::Ordering::SeqCst);
        assert_eq!(sched.poll_feeds().await.unwrap(), 1);
        assert_eq!(
            store.feeds.lock().unwrap()[0].last_item_id.as_deref(),
            Some("new")
        );
    }

    #[tokio::test]
    async fn one_broken_feed_does_not_abort_the_rest() {
        let store = Arc::new(MockStore::default());
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(1, "http://down", None));
        store
            .feeds
            .lock()
            .unwrap()
            .push(subscription(2, "http://up", None));
        let sender = Arc::new(MockSender::default());
        let fetcher = Arc::new(MockFetcher::with("http://up", one_item_feed("g", "ok")));
        let sched = Scheduler::new(store.clone(), sender.clone(), fetcher);

        assert_eq!(sched.poll_feeds().await.unwrap(), 1);
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("ok"));
    }
}
