//! # System Constants
//!
//! Queue names and protocol timings for the ride dispatch pipeline.

/// Durable queue names
pub mod queues {
    /// Rides awaiting a driver match. Produced by trip intake and by reconciliation.
    pub const OPEN_RIDE_QUEUE: &str = "open_ride_queue";

    /// Rides that have been offered and are awaiting driver acceptance
    pub const PENDING_OFFER_QUEUE: &str = "pending_offer_queue";
}

/// Protocol defaults, overridable through configuration
pub mod defaults {
    use std::time::Duration;

    /// Throttle before requeueing a ride nobody is near
    pub const NO_CANDIDATE_BACKOFF: Duration = Duration::from_secs(10);

    /// Time a driver has to accept after an offer
    pub const ACCEPTANCE_WINDOW: Duration = Duration::from_secs(15);

    /// Age after which an unanswered ride is abandoned
    pub const STALENESS_CEILING: Duration = Duration::from_secs(60 * 60);

    /// One unacknowledged delivery per consumer
    pub const PREFETCH_COUNT: u16 = 1;

    pub const SEARCH_RADIUS_KM: f64 = 5.0;

    pub const MAX_OFFER_CANDIDATES: usize = 10;

    pub const RPC_TIMEOUT: Duration = Duration::from_secs(5);

    /// Must exceed the longest in-worker wait (the acceptance window)
    pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);

    pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

    pub const MAX_MALFORMED_REDELIVERIES: u32 = 5;
}
