//! Shared primitive types used across the whole desk.

use chrono::{DateTime, Utc};

/// Wall-clock instant. Every timestamp in the desk is UTC.
pub type Timestamp = DateTime<Utc>;

/// Human-readable ticket code, e.g. `CMP-A1B2C3D4`.
pub type ComplaintCode = String;

/// Identifier of a staff member who can own complaints.
pub type AgentId = String;

/// Identifier of whoever performed an action, supplied by the auth layer.
pub type ActorId = String;
