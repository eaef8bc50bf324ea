//! SLA policy: priority tier to response/resolution budgets.
//!
//! Budgets are flat wall-clock hours, not business hours. Deadlines are
//! computed once, at filing, and never recomputed afterwards; escalation
//! raises the priority but leaves the original deadlines in place.

use crate::{
    complaint::{Complaint, Priority, SlaBlock, Status},
    error::{DeskError, DeskResult},
    types::Timestamp,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlaBudget {
    pub response_hours: u32,
    pub resolution_hours: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaDeadlines {
    pub response_deadline: Timestamp,
    pub resolution_deadline: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlaPolicy {
    pub critical: SlaBudget,
    pub high: SlaBudget,
    pub medium: SlaBudget,
    pub low: SlaBudget,
}

impl Default for SlaPolicy {
    fn default() -> Self {
        Self {
            critical: SlaBudget { response_hours: 1,  resolution_hours: 4 },
            high:     SlaBudget { response_hours: 4,  resolution_hours: 24 },
            medium:   SlaBudget { response_hours: 8,  resolution_hours: 72 },
            low:      SlaBudget { response_hours: 24, resolution_hours: 168 },
        }
    }
}

impl SlaPolicy {
    pub fn budget(&self, priority: Priority) -> SlaBudget {
        match priority {
            Priority::Critical => self.critical,
            Priority::High     => self.high,
            Priority::Medium   => self.medium,
            Priority::Low      => self.low,
        }
    }

    pub fn compute_deadlines(&self, priority: Priority, now: Timestamp) -> SlaDeadlines {
        let budget = self.budget(priority);
        SlaDeadlines {
            response_deadline: now + Duration::hours(i64::from(budget.response_hours)),
            resolution_deadline: now + Duration::hours(i64::from(budget.resolution_hours)),
        }
    }

    /// The SLA block stamped onto a complaint at filing.
    pub fn sla_block(&self, priority: Priority, now: Timestamp) -> SlaBlock {
        let budget = self.budget(priority);
        let deadlines = self.compute_deadlines(priority, now);
        SlaBlock {
            response_budget_hours: budget.response_hours,
            resolution_budget_hours: budget.resolution_hours,
            response_deadline: deadlines.response_deadline,
            resolution_deadline: deadlines.resolution_deadline,
            is_breached: false,
        }
    }

    /// Every tier needs a resolution budget at least as long as its response budget.
    pub fn validate(&self) -> DeskResult<()> {
        for priority in Priority::ALL {
            let b = self.budget(priority);
            if b.resolution_hours < b.response_hours {
                return Err(DeskError::Validation(format!(
                    "SLA tier '{priority}': resolution budget {}h is shorter than response budget {}h",
                    b.resolution_hours, b.response_hours
                )));
            }
        }
        Ok(())
    }
}

/// Breach predicate. Returns true iff the complaint is still open and
/// `now` is past its resolution deadline; when true, latches `is_breached`.
/// The flag never goes back to false.
pub fn check_sla_breach(complaint: &mut Complaint, now: Timestamp) -> bool {
    let breached = is_past_deadline(complaint.status, &complaint.sla, now);
    if breached {
        complaint.sla.is_breached = true;
    }
    breached
}

pub(crate) fn is_past_deadline(status: Status, sla: &SlaBlock, now: Timestamp) -> bool {
    !status.is_settled() && now > sla.resolution_deadline
}
