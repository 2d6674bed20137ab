use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A point on the map, WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Ride as carried on the open-ride and pending-offer queues
///
/// Rows are created by trip intake; this crate only reads and forwards them.
/// `offered_at` is stamped each time the ride is handed to the pending-offer queue
/// and is the reference point for the acceptance window and the staleness ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    pub id: i64,
    pub uuid: Uuid,
    pub passenger_id: String,
    #[serde(default)]
    pub driver_id: Option<i64>,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offered_at: Option<DateTime<Utc>>,
}

impl Ride {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lon)
    }

    /// Start a new offer cycle. Any stamp from an earlier cycle is replaced.
    pub fn mark_offered(&mut self, now: DateTime<Utc>) {
        self.offered_at = Some(now);
        self.updated_at = now;
    }

    /// Time since the current offer cycle began, `None` if never offered
    pub fn offer_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.offered_at.map(|offered| now - offered)
    }
}

/// Ride lifecycle as observed by the dispatch pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    Open,
    Offered,
    Assigned,
    Reopened,
    StaleDropped,
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Offered => "offered",
            Self::Assigned => "assigned",
            Self::Reopened => "reopened",
            Self::StaleDropped => "stale_dropped",
        };
        f.write_str(s)
    }
}
