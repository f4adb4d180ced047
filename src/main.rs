//! # Valet — Personal Assistant Bot
//!
//! Telegram assistant with reminders, notes, RSS feed watching, and a
//! supervised worker process, all managed through an admin HTTP API.
//!
//! Usage:
//!   valet                        # Start with ~/.valet/config.toml
//!   valet --config ./dev.toml    # Custom config path
//!   valet --autostart            # Connect the bot immediately

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use valet_channels::commands::CommandRouter;
use valet_channels::telegram::{TelegramApi, spawn_polling};
use valet_core::config::ValetConfig;
use valet_core::traits::SettingsProvider;
use valet_db::SqliteStore;
use valet_gateway::AppState;
use valet_runtime::{ArmFn, Armed, BotLifecycle, RetryPolicy, WorkerSupervisor};
use valet_scheduler::feed::HttpFeedFetcher;
use valet_scheduler::sweep::Scheduler;

#[derive(Parser)]
#[command(name = "valet", version, about = "🤵 Valet — personal assistant bot")]
struct Cli {
    /// Config file path (default: ~/.valet/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start the bot on launch instead of waiting for the admin API
    #[arg(long)]
    autostart: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "valet=debug,tower_http=debug"
    } else {
        "valet=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(ValetConfig::default_path);
    let config = if config_path.exists() {
        ValetConfig::load_from(&config_path)?
    } else {
        ValetConfig::default()
    };
    tracing::info!("Config: {}", config_path.display());

    if config.bot_token.is_empty() {
        tracing::warn!("⚠️ No bot token configured; set one via the admin API");
    }

    let db_path = shellexpand::tilde(&config.db_path).to_string();
    let store = Arc::new(SqliteStore::open(
        std::path::Path::new(&db_path),
        config.feeds.check_interval,
    )?);
    tracing::info!("💾 Store opened: {db_path}");

    // A runtime-stored endpoint override wins over the config file.
    let api_base = store
        .api_base_override()
        .await
        .unwrap_or_else(|| config.api_base.clone());
    let api = Arc::new(TelegramApi::new(&config.bot_token, &api_base));
    let fetcher = Arc::new(HttpFeedFetcher::new());
    let router = Arc::new(CommandRouter::new(
        api.clone(),
        store.clone(),
        fetcher.clone(),
        config.admin_id,
    ));

    let scheduler = Scheduler::new(store.clone(), api.clone(), fetcher.clone())
        .with_config_rules(config.feeds.keywords.clone(), config.feeds.exclude.clone());
    let arm = arm_callback(scheduler, api.clone(), router, store.clone());

    let lifecycle = Arc::new(BotLifecycle::new(
        api.clone(),
        RetryPolicy {
            max_retries: config.connect.max_retries,
            delay: Duration::from_secs(config.connect.retry_delay_secs),
        },
        arm,
    ));

    let supervisor = Arc::new(WorkerSupervisor::new(
        ValetConfig::home_dir().join("artifacts"),
        Duration::from_secs(config.worker.cleanup_delay_secs),
        config.worker.keep_artifact,
    ));

    if cli.autostart {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move {
            if let Err(e) = lifecycle.start().await {
                tracing::error!("Autostart failed: {e}");
            }
        });
    }

    let state = Arc::new(AppState::new(config, config_path, lifecycle, supervisor));
    valet_gateway::start(state).await
}

/// Build the lifecycle arm callback: on every successful connect it spawns
/// the scheduler sweeps and the Telegram polling loop, and hands back their
/// teardown.
fn arm_callback(
    scheduler: Scheduler,
    api: Arc<TelegramApi>,
    router: Arc<CommandRouter>,
    store: Arc<SqliteStore>,
) -> Arc<ArmFn> {
    let scheduler = Arc::new(scheduler);
    Arc::new(move || {
        let scheduler = scheduler.clone();
        let api = api.clone();
        let router = router.clone();
        let store = store.clone();
        Box::pin(async move {
            let feed_minutes = store.feed_poll_minutes().await;
            let timers = valet_scheduler::sweep::arm(scheduler, feed_minutes);
            let polling = spawn_polling(api, router);
            Armed::new(move || {
                timers.disarm();
                polling.abort();
            })
        }) as futures::future::BoxFuture<'static, Armed>
    })
}
