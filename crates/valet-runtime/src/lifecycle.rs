//! Bot lifecycle state machine.
//!
//! Stopped → Starting → Running, with Running → Stopped on teardown. All
//! transitions serialize behind one async mutex. `start` while Running is an
//! idempotent no-op; `start` while Starting attaches the caller to the
//! in-flight attempt (a shared future), so concurrent callers observe one
//! connect attempt and one result. Connect failures retry with a fixed
//! backoff up to a bounded count; exhaustion rolls the state back to
//! Stopped so a later `start` can try again.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use valet_core::error::{Result, ValetError};
use valet_core::traits::GatewayLink;
use valet_core::types::BotStatus;

/// Connect retry policy: one initial attempt plus `max_retries` retries,
/// `delay` apart.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay: Duration::from_secs(5),
        }
    }
}

/// Everything armed on entering Running; torn down exactly once on stop.
pub struct Armed {
    teardown: Box<dyn FnOnce() + Send>,
}

impl Armed {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Box::new(teardown),
        }
    }

    fn disarm(self) {
        (self.teardown)();
    }
}

/// The shared in-flight start attempt. The error is a plain string because
/// `Shared` hands every waiter a clone of the output.
type InFlight = Shared<BoxFuture<'static, std::result::Result<(), String>>>;

#[derive(Default)]
struct Inner {
    running: bool,
    in_flight: Option<InFlight>,
    armed: Option<Armed>,
}

/// Callback that arms the running state (spawns the scheduler and polling
/// loops) and yields their teardown.
pub type ArmFn = dyn Fn() -> BoxFuture<'static, Armed> + Send + Sync;

/// The process-wide lifecycle singleton.
pub struct BotLifecycle {
    inner: Arc<Mutex<Inner>>,
    link: Arc<dyn GatewayLink>,
    retry: RetryPolicy,
    arm: Arc<ArmFn>,
}

impl BotLifecycle {
    /// `arm` runs after a successful connect and spawns the scheduler and
    /// polling loops; its [`Armed`] teardown is invoked on stop.
    pub fn new(link: Arc<dyn GatewayLink>, retry: RetryPolicy, arm: Arc<ArmFn>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            link,
            retry,
            arm,
        }
    }

    pub async fn status(&self) -> BotStatus {
        let inner = self.inner.lock().await;
        BotStatus {
            running: inner.running,
            starting: inner.in_flight.is_some(),
        }
    }

    /// Start the bot. Idempotent while Running; coalescing while Starting.
    pub async fn start(&self) -> Result<BotStatus> {
        let attempt = {
            let mut inner = self.inner.lock().await;
            if inner.running {
                return Ok(BotStatus {
                    running: true,
                    starting: false,
                });
            }
            if let Some(existing) = &inner.in_flight {
                existing.clone()
            } else {
                let fut = self.launch();
                inner.in_flight = Some(fut.clone());
                // Drive the attempt independently of the callers, so a
                // cancelled caller cannot strand the state machine.
                tokio::spawn(fut.clone().map(|_| ()));
                fut
            }
        };

        attempt.await.map_err(ValetError::Channel)?;
        Ok(BotStatus {
            running: true,
            starting: false,
        })
    }

    fn launch(&self) -> InFlight {
        let link = self.link.clone();
        let arm = self.arm.clone();
        let inner = self.inner.clone();
        let retry = self.retry;

        async move {
            let result = connect_with_retry(link.as_ref(), retry).await;
            let mut guard = inner.lock().await;
            guard.in_flight = None;
            match result {
                Ok(()) => {
                    guard.armed = Some(arm().await);
                    guard.running = true;
                    tracing::info!("🚀 Bot started");
                    Ok(())
                }
                Err(e) => {
                    guard.running = false;
                    tracing::error!("Bot start failed: {e}");
                    Err(e.to_string())
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Stop the bot. A start still in flight is awaited first (its outcome
    /// swallowed) so teardown never races the connect attempt. No-op while
    /// Stopped.
    pub async fn stop(&self) -> BotStatus {
        let in_flight = {
            let inner = self.inner.lock().await;
            if !inner.running && inner.in_flight.is_none() {
                return BotStatus {
                    running: false,
                    starting: false,
                };
            }
            inner.in_flight.clone()
        };

        if let Some(attempt) = in_flight {
            let _ = attempt.await;
        }

        let mut inner = self.inner.lock().await;
        if let Some(armed) = inner.armed.take() {
            armed.disarm();
        }
        self.link.disconnect().await;
        inner.running = false;
        inner.in_flight = None;
        tracing::info!("⏹ Bot stopped");
        BotStatus {
            running: false,
            starting: false,
        }
    }
}

async fn connect_with_retry(link: &dyn GatewayLink, retry: RetryPolicy) -> Result<()> {
    let mut attempt = 0;
    loop {
        match link.connect().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < retry.max_retries => {
                attempt += 1;
                tracing::warn!(
                    "Gateway connect failed (attempt {attempt}/{}): {e}",
                    retry.max_retries
                );
                tokio::time::sleep(retry.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
