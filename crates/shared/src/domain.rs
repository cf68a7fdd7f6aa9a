use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerId(pub i64);

/// Upper bound on the visitor message, counted in characters.
pub const MAX_MESSAGE_CHARS: usize = 100;

/// A visitor-submitted point annotation. Markers are insert-only: the store
/// assigns `id` and `created_at`, and no client ever updates or deletes one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: MarkerId,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
    pub message: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

pub fn coordinate_in_bounds(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_coordinates_on_the_boundary() {
        assert!(coordinate_in_bounds(90.0, 180.0));
        assert!(coordinate_in_bounds(-90.0, -180.0));
        assert!(coordinate_in_bounds(0.0, 0.0));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert!(!coordinate_in_bounds(90.01, 0.0));
        assert!(!coordinate_in_bounds(0.0, -180.5));
        assert!(!coordinate_in_bounds(f64::NAN, 0.0));
    }
}
