use serde::{Deserialize, Serialize};

use super::Coordinate;

/// A driver returned by a nearest-neighbor query. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub driver_id: i64,
    /// Kilometers from the ride's pickup point
    pub distance: f64,
    pub coordinate: Coordinate,
}

/// Sort by ascending distance, keeping the matcher's order for ties
pub fn sort_by_distance(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}
