//! # yarnscale-events
//!
//! Container lifecycle events published by the allocation controller.
//!
//! ## Design Principles
//!
//! - Events are fire-and-forget notifications; publishing never fails and
//!   never blocks the controller
//! - Events are immutable records of state transitions that already happened
//! - Every event carries a time-ordered `event_id` and a dotted `event_type`
//!
//! ## Event Types
//!
//! - `container.count_changed`: the believed container count moved
//! - `container.launched`: a granted container was bound to an instance
//! - `container.released`: a self-initiated release completed
//! - `container.failed`: a container completed without being released
//! - `container.shutdown_requested`: the controller is releasing everything

mod bus;
mod envelope;
mod error;
mod types;

pub use bus::*;
pub use envelope::*;
pub use error::EventError;
pub use types::*;
