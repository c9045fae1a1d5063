pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::parcel::{NewParcel, Parcel, ParcelFilter, ParcelId, PickupOutcome};
use crate::models::resident::Resident;

/// Persistence for parcels and the resident directory.
/// Implementations: PgStore (PostgreSQL), MemoryStore (in-process).
#[async_trait]
pub trait ParcelStore: Send + Sync {
    /// Cheap liveness check used by `/readyz`.
    async fn ping(&self) -> anyhow::Result<()>;

    async fn get_resident(&self, id: i64) -> anyhow::Result<Option<Resident>>;

    async fn get_resident_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<Resident>>;

    async fn insert_parcel(&self, parcel: &NewParcel) -> anyhow::Result<Parcel>;

    async fn get_parcel(&self, id: ParcelId) -> anyhow::Result<Option<Parcel>>;

    async fn get_parcel_by_tracking_id(&self, tracking_id: Uuid)
        -> anyhow::Result<Option<Parcel>>;

    async fn list_parcels(&self, filter: &ParcelFilter) -> anyhow::Result<Vec<Parcel>>;

    /// Move a `PENDING` parcel to `PICKED_UP` as one atomic step.
    ///
    /// Of any number of concurrent calls for the same parcel, at most one
    /// returns `PickedUp`. `picked_up_time` is clamped to `created_at`.
    async fn mark_picked_up(
        &self,
        id: ParcelId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<PickupOutcome>;
}
