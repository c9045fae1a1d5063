use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A hostel resident, as synced from the external directory.
/// Read-only from the parcel desk's point of view.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, PartialEq)]
pub struct Resident {
    pub id: i64,
    /// Identity-provider id used by the resident-facing app.
    pub external_id: String,
    pub name: String,
    pub email: String,
    pub phone_number: Option<String>,
    pub room_number: Option<String>,
    pub block: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The slice of a resident shown next to a parcel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResidentSummary {
    pub id: i64,
    pub name: String,
    pub room_number: Option<String>,
    pub block: Option<String>,
    pub phone_number: Option<String>,
    pub email: String,
}

impl From<&Resident> for ResidentSummary {
    fn from(r: &Resident) -> Self {
        Self {
            id: r.id,
            name: r.name.clone(),
            room_number: r.room_number.clone(),
            block: r.block.clone(),
            phone_number: r.phone_number.clone(),
            email: r.email.clone(),
        }
    }
}
