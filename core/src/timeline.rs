//! Timeline: the append-only audit trail bound 1:1 to a complaint.
//!
//! RULE: `append` is the only mutator. Entries are never reordered,
//! edited or removed once appended; insertion order is the only
//! ordering guarantee.

use crate::types::{ActorId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimelineAction {
    Created,
    Assigned,
    StatusChanged,
    Resolved,
    Escalated,
    CommentAdded,
    AttachmentAdded,
    Rated,
    Updated,
    SlaBreached,
}

impl TimelineAction {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Created         => "created",
            Self::Assigned        => "assigned",
            Self::StatusChanged   => "status_changed",
            Self::Resolved        => "resolved",
            Self::Escalated       => "escalated",
            Self::CommentAdded    => "comment_added",
            Self::AttachmentAdded => "attachment_added",
            Self::Rated           => "rated",
            Self::Updated         => "updated",
            Self::SlaBreached     => "sla_breached",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "created"          => Self::Created,
            "assigned"         => Self::Assigned,
            "status_changed"   => Self::StatusChanged,
            "resolved"         => Self::Resolved,
            "escalated"        => Self::Escalated,
            "comment_added"    => Self::CommentAdded,
            "attachment_added" => Self::AttachmentAdded,
            "rated"            => Self::Rated,
            "updated"          => Self::Updated,
            "sla_breached"     => Self::SlaBreached,
            _ => return None,
        })
    }
}

impl fmt::Display for TimelineAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub action: TimelineAction,
    pub performed_by: Option<ActorId>,
    pub timestamp: Timestamp,
    pub details: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Timeline(Vec<TimelineEntry>);

impl Timeline {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Rebuild from persisted rows, already in insertion order.
    pub(crate) fn from_entries(entries: Vec<TimelineEntry>) -> Self {
        Self(entries)
    }

    pub fn append(
        &mut self,
        action: TimelineAction,
        actor: Option<&str>,
        timestamp: Timestamp,
        details: impl Into<String>,
    ) -> &TimelineEntry {
        self.0.push(TimelineEntry {
            action,
            performed_by: actor.map(String::from),
            timestamp,
            details: details.into(),
        });
        &self.0[self.0.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.0
    }

    pub fn last(&self) -> Option<&TimelineEntry> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimelineEntry> {
        self.0.iter()
    }

    /// Entries appended after the first `from`: the unsaved tail.
    pub(crate) fn since(&self, from: usize) -> &[TimelineEntry] {
        &self.0[from.min(self.0.len())..]
    }
}
