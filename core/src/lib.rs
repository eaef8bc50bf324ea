//! Ticketdesk core: complaint lifecycle, SLA engine and analytics.
//!
//! LAYERS (leaf first):
//!   complaint, timeline: the aggregate and its audit trail
//!   priority_classifier, sla_policy
//!   store: the only code that executes SQL
//!   assignment: agent directory and workload sets
//!   lifecycle: the state machine and its write path
//!   analytics: pure read-side projections

pub mod analytics;
pub mod assignment;
pub mod clock;
pub mod complaint;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod priority_classifier;
pub mod rng;
pub mod sla_policy;
pub mod store;
pub mod timeline;
pub mod types;

pub use error::{DeskError, DeskResult};
