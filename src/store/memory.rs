use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::ParcelStore;
use crate::models::parcel::{
    NewParcel, Parcel, ParcelFilter, ParcelId, ParcelStatus, PickupOutcome,
};
use crate::models::resident::Resident;

/// In-process store backed by DashMap.
///
/// The pickup transition runs under the shard write lock held by
/// `get_mut`, which gives the same at-most-one-winner guarantee as the
/// conditional UPDATE in PgStore.
#[derive(Clone, Default)]
pub struct MemoryStore {
    residents: Arc<DashMap<i64, Resident>>,
    parcels: Arc<DashMap<ParcelId, Parcel>>,
    next_resident_id: Arc<AtomicI64>,
    next_parcel_id: Arc<AtomicI64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a resident, the way the directory sync would.
    pub fn add_resident(
        &self,
        external_id: &str,
        name: &str,
        email: &str,
        room_number: Option<&str>,
    ) -> Resident {
        let id = self.next_resident_id.fetch_add(1, Ordering::SeqCst) + 1;
        let resident = Resident {
            id,
            external_id: external_id.to_string(),
            name: name.to_string(),
            email: email.to_string(),
            phone_number: None,
            room_number: room_number.map(String::from),
            block: None,
            created_at: Utc::now(),
        };
        self.residents.insert(id, resident.clone());
        resident
    }

    pub fn parcel_count(&self) -> usize {
        self.parcels.len()
    }
}

#[async_trait]
impl ParcelStore for MemoryStore {
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_resident(&self, id: i64) -> anyhow::Result<Option<Resident>> {
        Ok(self.residents.get(&id).map(|r| r.clone()))
    }

    async fn get_resident_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<Resident>> {
        Ok(self
            .residents
            .iter()
            .find(|r| r.external_id == external_id)
            .map(|r| r.clone()))
    }

    async fn insert_parcel(&self, parcel: &NewParcel) -> anyhow::Result<Parcel> {
        if !self.residents.contains_key(&parcel.resident_id) {
            anyhow::bail!("resident {} does not exist", parcel.resident_id);
        }
        if self
            .parcels
            .iter()
            .any(|p| p.tracking_id == parcel.tracking_id)
        {
            anyhow::bail!("duplicate tracking id {}", parcel.tracking_id);
        }

        let id = self.next_parcel_id.fetch_add(1, Ordering::SeqCst) + 1;
        let row = Parcel {
            id,
            tracking_id: parcel.tracking_id,
            resident_id: parcel.resident_id,
            description: parcel.description.clone(),
            service: parcel.service.clone(),
            status: ParcelStatus::Pending,
            created_at: parcel.created_at,
            picked_up_time: None,
        };
        self.parcels.insert(id, row.clone());
        Ok(row)
    }

    async fn get_parcel(&self, id: ParcelId) -> anyhow::Result<Option<Parcel>> {
        Ok(self.parcels.get(&id).map(|p| p.clone()))
    }

    async fn get_parcel_by_tracking_id(
        &self,
        tracking_id: Uuid,
    ) -> anyhow::Result<Option<Parcel>> {
        Ok(self
            .parcels
            .iter()
            .find(|p| p.tracking_id == tracking_id)
            .map(|p| p.clone()))
    }

    async fn list_parcels(&self, filter: &ParcelFilter) -> anyhow::Result<Vec<Parcel>> {
        let mut rows: Vec<Parcel> = self
            .parcels
            .iter()
            .filter(|p| filter.status.map_or(true, |s| p.status == s))
            .filter(|p| filter.resident_id.map_or(true, |r| p.resident_id == r))
            .map(|p| p.clone())
            .collect();

        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(rows
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn mark_picked_up(
        &self,
        id: ParcelId,
        at: DateTime<Utc>,
    ) -> anyhow::Result<PickupOutcome> {
        let Some(mut parcel) = self.parcels.get_mut(&id) else {
            return Ok(PickupOutcome::NotFound);
        };

        if parcel.status.is_terminal() {
            return Ok(PickupOutcome::AlreadyPickedUp(parcel.clone()));
        }

        parcel.status = ParcelStatus::PickedUp;
        parcel.picked_up_time = Some(at.max(parcel.created_at));
        Ok(PickupOutcome::PickedUp(parcel.clone()))
    }
}
