use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Router,
};
use subtle::ConstantTimeEq;

use crate::AppState;

pub mod handlers;

/// Build the front-desk API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/parcels",
            get(handlers::list_parcels).post(handlers::register_parcel),
        )
        .route("/parcels/:id", get(handlers::get_parcel))
        .route(
            "/parcels/tracking/:tracking_id",
            get(handlers::get_parcel_by_tracking_id),
        )
        .route("/parcels/:id/qr", get(handlers::get_pickup_qr))
        .route("/parcels/:id/qr/base64", get(handlers::get_pickup_qr_base64))
        .route("/parcels/:id/picked-up", patch(handlers::confirm_pickup))
        .route("/pickups/scan", post(handlers::scan_pickup))
        .route(
            "/residents/:external_id/parcels",
            get(handlers::list_resident_parcels),
        )
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured staff key. Returns 401 if missing or wrong.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state.config.admin_key.as_bytes();

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected)) => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 && k.is_char_boundary(4) && k.is_char_boundary(k.len() - 4) {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("staff API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("staff API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
