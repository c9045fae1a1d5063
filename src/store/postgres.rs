use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::ParcelStore;
use crate::models::parcel::{NewParcel, Parcel, ParcelFilter, ParcelId, PickupOutcome};
use crate::models::resident::Resident;

const PARCEL_COLUMNS: &str =
    "id, tracking_id, resident_id, description, service, status, created_at, picked_up_time";

const RESIDENT_COLUMNS: &str =
    "id, external_id, name, email, phone_number, room_number, block, created_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ParcelStore for PgStore {
    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // -- Resident Operations --

    async fn get_resident(&self, id: i64) -> anyhow::Result<Option<Resident>> {
        let row = sqlx::query_as::<_, Resident>(&format!(
            "SELECT {} FROM residents WHERE id = $1",
            RESIDENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_resident_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<Resident>> {
        let row = sqlx::query_as::<_, Resident>(&format!(
            "SELECT {} FROM residents WHERE external_id = $1",
            RESIDENT_COLUMNS
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // -- Parcel Operations --

    async fn insert_parcel(&self, parcel: &NewParcel) -> anyhow::Result<Parcel> {
        let row = sqlx::query_as::<_, Parcel>(&format!(
            r#"INSERT INTO parcels (tracking_id, resident_id, description, service, status, created_at)
               VALUES ($1, $2, $3, $4, 'PENDING', $5)
               RETURNING {}"#,
            PARCEL_COLUMNS
        ))
        .bind(parcel.tracking_id)
        .bind(parcel.resident_id)
        .bind(&parcel.description)
        .bind(&parcel.service)
        .bind(parcel.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_parcel(&self, id: ParcelId) -> anyhow::Result<Option<Parcel>> {
        let row = sqlx::query_as::<_, Parcel>(&format!(
            "SELECT {} FROM parcels WHERE id = $1",
            PARCEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_parcel_by_tracking_id(
        &self,
        tracking_id: Uuid,
    ) -> anyhow::Result<Option<Parcel>> {
        let row = sqlx::query_as::<_, Parcel>(&format!(
            "SELECT {} FROM parcels WHERE tracking_id = $1",
            PARCEL_COLUMNS
        ))
        .bind(tracking_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_parcels(&self, filter: &ParcelFilter) -> anyhow::Result<Vec<Parcel>> {
        let rows = sqlx::query_as::<_, Parcel>(&format!(
            r#"SELECT {} FROM parcels
               WHERE ($1::varchar IS NULL OR status = $1)
                 AND ($2::bigint IS NULL OR resident_id = $2)
               ORDER BY created_at DESC, id DESC
               LIMIT $3 OFFSET $4"#,
            PARCEL_COLUMNS
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.resident_id)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_picked_up(
        &self,
        id: ParcelId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<PickupOutcome> {
        // Conditional on status so concurrent scans cannot both win.
        let updated = sqlx::query_as::<_, Parcel>(&format!(
            r#"UPDATE parcels
               SET status = 'PICKED_UP', picked_up_time = GREATEST($2, created_at)
               WHERE id = $1 AND status = 'PENDING'
               RETURNING {}"#,
            PARCEL_COLUMNS
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(parcel) = updated {
            return Ok(PickupOutcome::PickedUp(parcel));
        }

        Ok(match self.get_parcel(id).await? {
            Some(parcel) => PickupOutcome::AlreadyPickedUp(parcel),
            None => PickupOutcome::NotFound,
        })
    }
}
