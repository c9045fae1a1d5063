use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::lifecycle::{PickupReceipt, RegisterParcel};
use crate::models::parcel::{Parcel, ParcelFilter, ParcelId, ParcelStatus};
use crate::models::resident::ResidentSummary;
use crate::AppState;

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterParcelRequest {
    pub resident_id: i64,
    pub description: Option<String>,
    pub service: Option<String>,
}

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<String>,
    pub resident_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct ScanRequest {
    pub token: String,
}

#[derive(Serialize)]
pub struct QrBase64Response {
    pub parcel_id: ParcelId,
    /// `data:image/png;base64,...`
    pub image: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct PickupResponse {
    pub parcel: Parcel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resident: Option<ResidentSummary>,
    pub message: String,
}

#[derive(Serialize)]
pub struct ResidentParcelsResponse {
    pub resident: ResidentSummary,
    pub parcels: Vec<Parcel>,
}

// ── Handlers ─────────────────────────────────────────────────

/// POST /api/v1/parcels: log a parcel that just arrived
pub async fn register_parcel(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterParcelRequest>,
) -> Result<(StatusCode, Json<Parcel>), AppError> {
    let parcel = state
        .lifecycle
        .register_parcel(RegisterParcel {
            resident_id: payload.resident_id,
            description: payload.description,
            service: payload.service,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(parcel)))
}

/// GET /api/v1/parcels?status=&resident_id=&limit=&offset=
pub async fn list_parcels(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Parcel>>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<ParcelStatus>)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let mut filter = ParcelFilter::paged(params.limit, params.offset);
    filter.status = status;
    filter.resident_id = params.resident_id;

    Ok(Json(state.lifecycle.list_parcels(&filter).await?))
}

/// GET /api/v1/parcels/:id
pub async fn get_parcel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ParcelId>,
) -> Result<Json<Parcel>, AppError> {
    Ok(Json(state.lifecycle.get_parcel(id).await?))
}

/// GET /api/v1/parcels/tracking/:tracking_id
pub async fn get_parcel_by_tracking_id(
    State(state): State<Arc<AppState>>,
    Path(tracking_id): Path<String>,
) -> Result<Json<Parcel>, AppError> {
    // A malformed tracking id cannot match anything.
    let tracking_id = Uuid::parse_str(&tracking_id).map_err(|_| AppError::ParcelNotFound)?;
    Ok(Json(
        state.lifecycle.get_parcel_by_tracking_id(tracking_id).await?,
    ))
}

/// GET /api/v1/residents/:external_id/parcels
pub async fn list_resident_parcels(
    State(state): State<Arc<AppState>>,
    Path(external_id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<ResidentParcelsResponse>, AppError> {
    let (resident, parcels) = state
        .lifecycle
        .list_resident_parcels(&external_id, ParcelFilter::paged(params.limit, params.offset))
        .await?;
    Ok(Json(ResidentParcelsResponse {
        resident: ResidentSummary::from(&resident),
        parcels,
    }))
}

/// GET /api/v1/parcels/:id/qr: pickup QR as a PNG image
pub async fn get_pickup_qr(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ParcelId>,
) -> Result<impl IntoResponse, AppError> {
    let qr = state.lifecycle.issue_qr_png(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png".to_string()),
            (
                header::HeaderName::from_static("x-pickup-expires-at"),
                qr.expires_at.to_rfc3339(),
            ),
        ],
        qr.image,
    ))
}

/// GET /api/v1/parcels/:id/qr/base64: pickup QR as a data URI
pub async fn get_pickup_qr_base64(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ParcelId>,
) -> Result<Json<QrBase64Response>, AppError> {
    let qr = state.lifecycle.issue_qr_data_uri(id).await?;
    Ok(Json(QrBase64Response {
        parcel_id: qr.parcel_id,
        image: qr.image,
        expires_at: qr.expires_at,
    }))
}

/// POST /api/v1/pickups/scan: confirm pickup from a scanned QR token
pub async fn scan_pickup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<PickupResponse>, AppError> {
    let PickupReceipt { parcel, resident } =
        state.lifecycle.confirm_by_token(&payload.token).await?;
    Ok(Json(PickupResponse {
        parcel,
        resident,
        message: "Parcel marked as picked up".to_string(),
    }))
}

/// PATCH /api/v1/parcels/:id/picked-up: staff confirmation without a scan
pub async fn confirm_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<ParcelId>,
) -> Result<Json<PickupResponse>, AppError> {
    let parcel = state.lifecycle.confirm_direct(id).await?;
    Ok(Json(PickupResponse {
        parcel,
        resident: None,
        message: "Parcel marked as picked up".to_string(),
    }))
}
