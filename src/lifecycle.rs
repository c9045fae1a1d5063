//! Parcel lifecycle: registration, pickup-code issuance and the
//! `PENDING` → `PICKED_UP` transition.
//!
//! Two paths lead to `PICKED_UP`: a scanned pickup token, or a staff member
//! confirming by parcel id. Both go through `ParcelStore::mark_picked_up`,
//! which only ever lets one caller win.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::parcel::{
    NewParcel, Parcel, ParcelFilter, ParcelId, PickupOutcome, MAX_SERVICE_LEN,
};
use crate::models::resident::{Resident, ResidentSummary};
use crate::notification::webhook::{ParcelEvent, PickupMethod, WebhookNotifier};
use crate::qr::{png_data_uri, PngQrRenderer, QrRenderer};
use crate::signing::{IssuedToken, PickupSigner, TokenTtl};
use crate::store::ParcelStore;

/// What a direct staff confirmation does with an already picked-up parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmMode {
    /// Reject it as a conflict, same as a repeated QR scan.
    #[default]
    Strict,
    /// Return the existing record unchanged.
    ///
    /// QR issuance and scanning stay enabled in this mode, so a parcel
    /// collected by scan can still be "confirmed" again by staff without
    /// an error. Scans themselves always conflict.
    Lenient,
}

impl FromStr for ConfirmMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ConfirmMode::Strict),
            "lenient" => Ok(ConfirmMode::Lenient),
            other => anyhow::bail!("invalid confirm mode: {}. Must be 'strict' or 'lenient'", other),
        }
    }
}

impl fmt::Display for ConfirmMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmMode::Strict => f.write_str("strict"),
            ConfirmMode::Lenient => f.write_str("lenient"),
        }
    }
}

/// Staff input for a newly arrived parcel.
#[derive(Debug, Clone, Default)]
pub struct RegisterParcel {
    pub resident_id: i64,
    pub description: Option<String>,
    pub service: Option<String>,
}

/// Returned from a successful scan.
#[derive(Debug, Clone, Serialize)]
pub struct PickupReceipt {
    pub parcel: Parcel,
    pub resident: Option<ResidentSummary>,
}

/// A freshly issued pickup QR code.
#[derive(Debug, Clone)]
pub struct PickupQr<T> {
    pub parcel_id: ParcelId,
    pub image: T,
    pub expires_at: DateTime<Utc>,
}

pub struct ParcelLifecycle {
    store: Arc<dyn ParcelStore>,
    signer: PickupSigner,
    renderer: Arc<dyn QrRenderer>,
    notifier: WebhookNotifier,
    ttl: TokenTtl,
    confirm_mode: ConfirmMode,
}

impl ParcelLifecycle {
    pub fn new(store: Arc<dyn ParcelStore>, signer: PickupSigner, ttl: TokenTtl) -> Self {
        Self {
            store,
            signer,
            renderer: Arc::new(PngQrRenderer::default()),
            notifier: WebhookNotifier::disabled(),
            ttl,
            confirm_mode: ConfirmMode::default(),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn QrRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_notifier(mut self, notifier: WebhookNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_confirm_mode(mut self, mode: ConfirmMode) -> Self {
        self.confirm_mode = mode;
        self
    }

    pub fn store(&self) -> &Arc<dyn ParcelStore> {
        &self.store
    }

    pub fn token_ttl(&self) -> TokenTtl {
        self.ttl
    }

    pub fn confirm_mode(&self) -> ConfirmMode {
        self.confirm_mode
    }

    /// Wait for webhook deliveries still in flight.
    pub async fn flush_notifications(&self) {
        self.notifier.flush().await;
    }

    fn now(&self) -> DateTime<Utc> {
        self.signer.clock().now()
    }

    // -- Registration & lookup --

    pub async fn register_parcel(&self, req: RegisterParcel) -> Result<Parcel, AppError> {
        let service = normalize(req.service);
        if let Some(ref s) = service {
            if s.chars().count() > MAX_SERVICE_LEN {
                return Err(AppError::BadRequest(format!(
                    "service must be at most {} characters",
                    MAX_SERVICE_LEN
                )));
            }
        }

        let resident = self
            .store
            .get_resident(req.resident_id)
            .await?
            .ok_or(AppError::ResidentNotFound)?;

        let parcel = self
            .store
            .insert_parcel(&NewParcel {
                tracking_id: Uuid::new_v4(),
                resident_id: resident.id,
                description: normalize(req.description),
                service,
                created_at: self.now(),
            })
            .await?;

        tracing::info!(
            parcel_id = parcel.id,
            tracking_id = %parcel.tracking_id,
            resident_id = resident.id,
            "parcel registered"
        );
        self.notifier
            .notify(ParcelEvent::parcel_registered(&parcel, &resident));

        Ok(parcel)
    }

    pub async fn get_parcel(&self, id: ParcelId) -> Result<Parcel, AppError> {
        self.store
            .get_parcel(id)
            .await?
            .ok_or(AppError::ParcelNotFound)
    }

    pub async fn get_parcel_by_tracking_id(&self, tracking_id: Uuid) -> Result<Parcel, AppError> {
        self.store
            .get_parcel_by_tracking_id(tracking_id)
            .await?
            .ok_or(AppError::ParcelNotFound)
    }

    pub async fn list_parcels(&self, filter: &ParcelFilter) -> Result<Vec<Parcel>, AppError> {
        Ok(self.store.list_parcels(filter).await?)
    }

    /// Parcels belonging to the resident with the given directory id.
    pub async fn list_resident_parcels(
        &self,
        external_id: &str,
        mut filter: ParcelFilter,
    ) -> Result<(Resident, Vec<Parcel>), AppError> {
        let resident = self
            .store
            .get_resident_by_external_id(external_id)
            .await?
            .ok_or(AppError::ResidentNotFound)?;
        filter.resident_id = Some(resident.id);
        let parcels = self.store.list_parcels(&filter).await?;
        Ok((resident, parcels))
    }

    // -- Pickup codes --

    /// Sign a pickup token for a `PENDING` parcel.
    pub async fn issue_pickup_token(&self, id: ParcelId) -> Result<IssuedToken, AppError> {
        let parcel = self.get_parcel(id).await?;
        if !parcel.is_pending() {
            tracing::info!(parcel_id = id, "refusing pickup code for collected parcel");
            return Err(AppError::ParcelNotPending);
        }
        Ok(self.signer.issue(&parcel.id.to_string(), self.ttl))
    }

    pub async fn issue_qr_png(&self, id: ParcelId) -> Result<PickupQr<Vec<u8>>, AppError> {
        let issued = self.issue_pickup_token(id).await?;
        let png = self.renderer.render_png(&issued.token)?;
        Ok(PickupQr {
            parcel_id: id,
            image: png,
            expires_at: issued.expires_at,
        })
    }

    pub async fn issue_qr_data_uri(&self, id: ParcelId) -> Result<PickupQr<String>, AppError> {
        let qr = self.issue_qr_png(id).await?;
        Ok(PickupQr {
            parcel_id: qr.parcel_id,
            image: png_data_uri(&qr.image),
            expires_at: qr.expires_at,
        })
    }

    // -- Transitions --

    /// Confirm pickup from a scanned token.
    ///
    /// A token that verifies can still be refused: once the parcel is
    /// `PICKED_UP`, every further scan reports `AlreadyPickedUp`.
    pub async fn confirm_by_token(&self, token: &str) -> Result<PickupReceipt, AppError> {
        let subject = self.signer.verify(token.trim(), self.ttl).map_err(|e| {
            tracing::warn!(error = %e, "pickup token rejected");
            AppError::from(e)
        })?;

        let parcel_id: ParcelId = subject.parse().map_err(|_| {
            tracing::warn!(subject = %subject, "signed token subject is not a parcel id");
            AppError::InvalidToken
        })?;

        match self.store.mark_picked_up(parcel_id, self.now()).await? {
            PickupOutcome::PickedUp(parcel) => {
                tracing::info!(parcel_id, method = "qr_scan", "parcel picked up");
                self.notifier
                    .notify(ParcelEvent::parcel_picked_up(&parcel, PickupMethod::QrScan));
                // The transition is committed; a failed lookup only costs the summary.
                let resident = match self.store.get_resident(parcel.resident_id).await {
                    Ok(r) => r.map(|r| ResidentSummary::from(&r)),
                    Err(e) => {
                        tracing::warn!(parcel_id, error = %e, "resident lookup failed after pickup");
                        None
                    }
                };
                Ok(PickupReceipt { parcel, resident })
            }
            PickupOutcome::AlreadyPickedUp(_) => {
                tracing::warn!(parcel_id, "replayed pickup token");
                Err(AppError::AlreadyPickedUp)
            }
            PickupOutcome::NotFound => Err(AppError::ParcelNotFound),
        }
    }

    /// Staff confirmation without a token.
    pub async fn confirm_direct(&self, id: ParcelId) -> Result<Parcel, AppError> {
        match self.store.mark_picked_up(id, self.now()).await? {
            PickupOutcome::PickedUp(parcel) => {
                tracing::info!(parcel_id = id, method = "staff", "parcel picked up");
                self.notifier
                    .notify(ParcelEvent::parcel_picked_up(&parcel, PickupMethod::Staff));
                Ok(parcel)
            }
            PickupOutcome::AlreadyPickedUp(parcel) => match self.confirm_mode {
                ConfirmMode::Strict => Err(AppError::AlreadyPickedUp),
                ConfirmMode::Lenient => Ok(parcel),
            },
            PickupOutcome::NotFound => Err(AppError::ParcelNotFound),
        }
    }
}

fn normalize(field: Option<String>) -> Option<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
