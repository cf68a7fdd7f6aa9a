use serde::{Deserialize, Serialize};

use crate::domain::Marker;

/// Insert payload for a marker; the store fills in `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMarker {
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub message: String,
    pub country: String,
}

/// Change-feed frame pushed to every connected client. The feed carries
/// insert events only; markers are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MarkerInserted { marker: Marker },
}
