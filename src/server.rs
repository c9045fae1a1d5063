use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::lifecycle::{ConfirmMode, ParcelLifecycle};
use crate::notification::webhook::WebhookNotifier;
use crate::qr::PngQrRenderer;
use crate::signing::PickupSigner;
use crate::store::postgres::PgStore;
use crate::store::ParcelStore;
use crate::{api, AppState};

/// Wire the lifecycle controller from config over the given store.
pub fn build_state(cfg: Config, store: Arc<dyn ParcelStore>) -> anyhow::Result<Arc<AppState>> {
    let signer = PickupSigner::from_hex(&cfg.signing_key, Arc::new(SystemClock))?;
    let notifier = WebhookNotifier::new(cfg.webhook_urls.clone(), cfg.webhook_secret.clone())?;
    if cfg.confirm_mode == ConfirmMode::Lenient {
        tracing::warn!(
            "PARCELDESK_CONFIRM_MODE=lenient: repeated staff confirmations succeed \
             even though QR pickup is enabled; scans still conflict"
        );
    }
    if notifier.is_enabled() {
        tracing::info!(targets = cfg.webhook_urls.len(), "webhook notifications enabled");
    }

    let lifecycle = ParcelLifecycle::new(store, signer, cfg.token_ttl)
        .with_renderer(Arc::new(PngQrRenderer::new(cfg.qr_module_px)))
        .with_notifier(notifier)
        .with_confirm_mode(cfg.confirm_mode);

    Ok(Arc::new(AppState {
        lifecycle,
        config: cfg,
    }))
}

/// The full HTTP application: health checks, `/api/v1`, CORS and the
/// response-header middleware.
pub fn app(state: Arc<AppState>) -> Router {
    let dashboard_origin = state.config.dashboard_origin.clone();

    Router::new()
        // Health endpoints (no auth)
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readiness_check))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(dashboard_origin))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(axum::middleware::from_fn(security_headers_middleware))
}

/// The dashboard origin plus any localhost port, for local development.
fn cors_layer(dashboard_origin: String) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin, _| {
            let origin_str = origin.to_str().unwrap_or("");
            origin_str == dashboard_origin
                || origin_str.starts_with("http://localhost:")
                || origin_str.starts_with("http://127.0.0.1:")
        }))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
            HeaderName::from_static("x-admin-key"),
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-pickup-expires-at")])
        .allow_credentials(true)
}

/// Connect, migrate and serve until the listener fails.
pub async fn run(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url, cfg.db_max_connections).await?;

    tracing::info!("Running migrations...");
    db.migrate().await?;

    tracing::info!(
        ttl = %cfg.token_ttl,
        confirm_mode = %cfg.confirm_mode,
        "pickup codes configured"
    );
    let state = build_state(cfg, Arc::new(db))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Parceldesk listening on {}", addr);
    axum::serve(listener, app(state)).await?;

    Ok(())
}

async fn readiness_check(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.lifecycle.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response.
/// This allows the desk dashboard to correlate errors with server logs.
async fn request_id_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}

/// Middleware: injects security headers into every response.
async fn security_headers_middleware(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();

    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    // Pickup codes are bearer credentials; never let a proxy keep one.
    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=()"),
    );
    headers.remove("server");

    resp
}
