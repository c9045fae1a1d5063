use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ParcelId = i64;

pub const MAX_SERVICE_LEN: usize = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// `Pending` → `PickedUp`. `PickedUp` is terminal.
#[derive(Debug, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParcelStatus {
    Pending,
    PickedUp,
}

impl ParcelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParcelStatus::Pending => "PENDING",
            ParcelStatus::PickedUp => "PICKED_UP",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ParcelStatus::PickedUp)
    }
}

impl fmt::Display for ParcelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParcelStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Ok(ParcelStatus::Pending),
            "PICKED_UP" => Ok(ParcelStatus::PickedUp),
            other => anyhow::bail!("unknown parcel status: {}", other),
        }
    }
}

/// One physical item waiting at the front desk.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Parcel {
    pub id: ParcelId,
    /// User-facing identifier. Random, never derived from `id`.
    pub tracking_id: Uuid,
    pub resident_id: i64,
    pub description: Option<String>,
    pub service: Option<String>,
    pub status: ParcelStatus,
    pub created_at: DateTime<Utc>,
    pub picked_up_time: Option<DateTime<Utc>>,
}

impl Parcel {
    pub fn is_pending(&self) -> bool {
        self.status == ParcelStatus::Pending
    }
}

/// Fields supplied by staff when a parcel arrives.
#[derive(Debug, Clone)]
pub struct NewParcel {
    pub tracking_id: Uuid,
    pub resident_id: i64,
    pub description: Option<String>,
    pub service: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Query filter for parcel listings. Newest first.
#[derive(Debug, Clone)]
pub struct ParcelFilter {
    pub status: Option<ParcelStatus>,
    pub resident_id: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl ParcelFilter {
    /// 1 <= limit <= 200 (default 50), offset >= 0.
    pub fn paged(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            status: None,
            resident_id: None,
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for ParcelFilter {
    fn default() -> Self {
        Self::paged(None, None)
    }
}

/// Result of the atomic `PENDING` → `PICKED_UP` transition.
#[derive(Debug, Clone, PartialEq)]
pub enum PickupOutcome {
    PickedUp(Parcel),
    /// The parcel was already terminal; carries the unchanged record.
    AlreadyPickedUp(Parcel),
    NotFound,
}
