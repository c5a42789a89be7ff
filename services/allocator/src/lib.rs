//! yarnscale allocator library.
//!
//! Keeps the set of worker containers held from a cluster resource manager
//! at a target size. Containers bound to in-use worker instances are never
//! released, grants are launched with a heap sized from the memory actually
//! granted, and containers that die on their own are replaced.
//!
//! ## Architecture
//!
//! ```text
//! caller ── reconcile(target, in_use) ──► Controller ──► ClusterManagerClient
//!                                             ▲                  │
//!                                             └─ notifications ◄─┘
//! ```
//!
//! ## Modules
//!
//! - `client`: cluster-manager contract and notification types
//! - `command`: worker launch command and heap sizing
//! - `controller`: reconciliation and notification handlers
//! - `registry`: container records and their lifecycle
//! - `naming`: instance names bound at grant time
//! - `simulated`: in-process cluster manager

pub mod client;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod naming;
pub mod registry;
pub mod simulated;

pub use client::{ClusterManagerClient, ClusterNotification, Container, ContainerStatus, ResourceSpec};
pub use config::Config;
pub use controller::{Controller, ReconcileOutcome};
pub use error::{AllocatorError, AllocatorResult};
