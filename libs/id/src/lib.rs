//! # yarnscale-id
//!
//! Identifier types used by the container allocation controller.
//!
//! ## Design Principles
//!
//! - Container IDs are assigned by the cluster manager and are opaque: they are
//!   compared and ordered as strings, never decomposed into numeric parts
//! - Instance names are the logical identity a worker registers under
//! - Request IDs are local to one controller and strictly increasing
//! - Event IDs are ULID-based so they sort by creation time
//!
//! ## ID Formats
//!
//! - `container_1700000000000_0001_01_000002` (cluster manager, opaque)
//! - `YarnTaskRunner_3` (instance name)
//! - `req-17` (request id)
//! - `evt_01HV4Z2WQXKJNM8GPQY6VBKC3D` (event id)

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
