//! # Data Models
//!
//! Rides travel on the queues as JSON; drivers and tasks live in the driver registry.

pub mod candidate;
pub mod driver;
pub mod ride;
pub mod task;

pub use candidate::{sort_by_distance, Candidate};
pub use driver::{Driver, NewDriver};
pub use ride::{Coordinate, Ride, RideStatus};
pub use task::{NewTask, Task};
