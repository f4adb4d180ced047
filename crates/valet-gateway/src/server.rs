//! HTTP server implementation using Axum.

use axum::{
    Router,
    extract::State,
    routing::{any, get, post},
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use valet_core::config::ValetConfig;
use valet_runtime::{BotLifecycle, WorkerSupervisor};

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Mutex<ValetConfig>>,
    pub config_path: PathBuf,
    pub start_time: std::time::Instant,
    pub lifecycle: Arc<BotLifecycle>,
    pub supervisor: Arc<WorkerSupervisor>,
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(
        config: ValetConfig,
        config_path: PathBuf,
        lifecycle: Arc<BotLifecycle>,
        supervisor: Arc<WorkerSupervisor>,
    ) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
            config_path,
            start_time: std::time::Instant::now(),
            lifecycle,
            supervisor,
            client: reqwest::Client::new(),
        }
    }

    /// The configured admin password, or `None` on a poisoned lock.
    pub(crate) fn admin_password(&self) -> Option<String> {
        self.config
            .lock()
            .ok()
            .map(|cfg| cfg.admin_password.clone())
    }
}

/// Admin auth middleware — validates the `x-admin-password` header.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let Some(expected) = state.admin_password() else {
        return error_response(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to read config",
        );
    };
    if expected.is_empty() {
        return error_response(axum::http::StatusCode::FORBIDDEN, "Set admin password first");
    }

    let supplied = req
        .headers()
        .get("x-admin-password")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if supplied != expected {
        return error_response(axum::http::StatusCode::UNAUTHORIZED, "Invalid password");
    }
    next.run(req).await
}

pub(crate) fn error_response(
    status: axum::http::StatusCode,
    message: &str,
) -> axum::response::Response {
    let body = serde_json::json!({ "message": message }).to_string();
    axum::response::Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(axum::body::Body::from(body))
        .unwrap_or_default()
}

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Worker passthrough mounts first so admin auth never applies to it.
    let passthrough = Router::new()
        .route("/app", any(super::proxy::to_worker))
        .route("/app/{*rest}", any(super::proxy::to_worker));

    let admin = Router::new()
        .route("/api/config", get(super::routes::get_config))
        .route("/api/config", post(super::routes::update_config))
        .route("/api/bot/status", get(super::routes::bot_status))
        .route("/api/bot/start", post(super::routes::bot_start))
        .route("/api/bot/stop", post(super::routes::bot_stop))
        .route("/api/worker/status", get(super::routes::worker_status))
        .route("/api/worker/start", post(super::routes::worker_start))
        .route("/api/worker/stop", post(super::routes::worker_stop))
        .route("/api/env", get(super::routes::env_info))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    let public = Router::new().route("/health", get(super::routes::health_check));

    passthrough
        .merge(admin)
        .merge(public)
        .layer(
            CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .allow_origin(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server. Runs until the process exits.
pub async fn start(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = {
        let cfg = state
            .config
            .lock()
            .map_err(|_| anyhow::anyhow!("config lock poisoned"))?;
        format!("{}:{}", cfg.gateway.host, cfg.gateway.port)
    };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Admin gateway listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;
    use valet_core::error::Result;
    use valet_core::traits::GatewayLink;
    use valet_runtime::{ArmFn, Armed, RetryPolicy};

    struct NullLink;

    fn noop_arm() -> std::pin::Pin<Box<dyn std::future::Future<Output = Armed> + Send>> {
        Box::pin(async { Armed::new(|| {}) })
    }

    #[async_trait]
    impl GatewayLink for NullLink {
        async fn connect(&self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&self) {}
    }

    fn test_state(password: &str) -> Arc<AppState> {
        let mut config = ValetConfig::default();
        config.admin_password = password.into();
        let arm: Arc<ArmFn> = Arc::new(noop_arm);
        let lifecycle = Arc::new(BotLifecycle::new(
            Arc::new(NullLink),
            RetryPolicy::default(),
            arm,
        ));
        let supervisor = Arc::new(WorkerSupervisor::new(
            std::env::temp_dir().join("valet-gw-test"),
            std::time::Duration::from_secs(2),
            false,
        ));
        Arc::new(AppState::new(
            config,
            std::env::temp_dir().join("valet-gw-test/config.toml"),
            lifecycle,
            supervisor,
        ))
    }

    #[tokio::test]
    async fn admin_routes_reject_missing_password() {
        let app = build_router(test_state("secret"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/bot/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_reject_wrong_password() {
        let app = build_router(test_state("secret"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/bot/status")
                    .header("x-admin-password", "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_routes_accept_correct_password() {
        let app = build_router(test_state("secret"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/bot/status")
                    .header("x-admin-password", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_password_locks_the_api_out() {
        let app = build_router(test_state(""));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/config")
                    .header("x-admin-password", "")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = build_router(test_state("secret"));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn proxy_without_worker_returns_bad_gateway() {
        let app = build_router(test_state("secret"));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/app/anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
