use std::time::Duration;

use serde::Serialize;

/// Result of one dispatch cycle on the open-ride queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Nothing was waiting on the queue
    Idle,
    /// At least one offer went out and the ride moved to the pending-offer queue
    Offered {
        ride_id: i64,
        offers_sent: usize,
        offers_failed: usize,
    },
    /// No driver nearby; the ride was requeued after the backoff
    NoCandidates {
        ride_id: i64,
        backoff: Duration,
        deferred: bool,
    },
    GeoFailed { ride_id: i64 },
    AllOffersFailed { ride_id: i64, attempted: usize },
    PublishFailed { ride_id: i64 },
    Malformed { dead_lettered: bool },
}

impl DispatchOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn ride_id(&self) -> Option<i64> {
        match self {
            Self::Offered { ride_id, .. }
            | Self::NoCandidates { ride_id, .. }
            | Self::GeoFailed { ride_id }
            | Self::AllOffersFailed { ride_id, .. }
            | Self::PublishFailed { ride_id } => Some(*ride_id),
            Self::Idle | Self::Malformed { .. } => None,
        }
    }
}

/// Result of one reconciliation cycle on the pending-offer queue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Idle,
    /// Acceptance window still open; redelivery scheduled for when it closes
    Deferred { ride_id: i64, remaining: Duration },
    /// A task exists; the ride is finalized
    Assigned { ride_id: i64, driver_id: i64 },
    /// No task after the window; the ride went back to the open-ride queue.
    /// `duplicate` is set when an earlier delivery had already republished it.
    Reopened { ride_id: i64, duplicate: bool },
    StaleDropped { ride_id: i64 },
    LookupFailed { ride_id: i64 },
    RepublishFailed { ride_id: i64 },
    Malformed { dead_lettered: bool },
}

impl ReconciliationOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn ride_id(&self) -> Option<i64> {
        match self {
            Self::Deferred { ride_id, .. }
            | Self::Assigned { ride_id, .. }
            | Self::Reopened { ride_id, .. }
            | Self::StaleDropped { ride_id }
            | Self::LookupFailed { ride_id }
            | Self::RepublishFailed { ride_id } => Some(*ride_id),
            Self::Idle | Self::Malformed { .. } => None,
        }
    }
}
