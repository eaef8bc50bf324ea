//! Assignment service: binds complaints to agents under department load limits.
//!
//! RULE: An agent's workload is the *set* of complaint ids in
//! `agent_assignment`, never a counter. Adding an existing member is a
//! no-op, so a retried write can never double count.
//!
//! RULE: Capacity counts open work only (assigned complaints that are not
//! resolved or closed), measured against the agent's department limit.

use crate::{
    complaint::{is_valid_email, Department},
    config::{CapacityPolicy, DeskConfig},
    error::{DeskError, DeskResult},
    store::{
        add_membership_in, complaint_exists_in, find_agent_in, is_member_in, open_workload_in,
        remove_membership_in, DeskStore,
    },
    types::{AgentId, ComplaintCode, Timestamp},
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub agent_id: AgentId,
    pub name: String,
    pub email: String,
    pub department: Department,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

/// What a successful bind did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentOutcome {
    pub agent: Agent,
    /// False when the complaint was already in the agent's set.
    pub newly_added: bool,
    /// True when the warn policy let the bind through past the limit.
    pub over_capacity: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkload {
    pub agent_id: AgentId,
    pub assigned: Vec<ComplaintCode>,
    pub open: u32,
    pub max_per_agent: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct AssignmentService {
    limits: HashMap<Department, u32>,
    policy: CapacityPolicy,
}

impl AssignmentService {
    pub fn new(limits: HashMap<Department, u32>, policy: CapacityPolicy) -> Self {
        Self { limits, policy }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        let limits = config
            .departments
            .iter()
            .map(|(dept, settings)| (*dept, settings.max_complaints_per_agent))
            .collect();
        Self::new(limits, config.capacity_policy)
    }

    pub fn policy(&self) -> CapacityPolicy {
        self.policy
    }

    pub fn limit_for(&self, department: Department) -> Option<u32> {
        self.limits.get(&department).copied()
    }

    // ── Directory ──────────────────────────────────────────────────

    pub fn register_agent(&self, store: &DeskStore, agent: &Agent) -> DeskResult<()> {
        if agent.agent_id.trim().is_empty() {
            return Err(DeskError::Validation("Agent id is required".into()));
        }
        if agent.name.trim().is_empty() {
            return Err(DeskError::Validation("Agent name is required".into()));
        }
        if !is_valid_email(&agent.email) {
            return Err(DeskError::Validation("Please provide a valid email".into()));
        }
        if agent.department == Department::Unknown {
            return Err(DeskError::Validation(format!(
                "Agent '{}' needs a known department",
                agent.agent_id
            )));
        }
        store.upsert_agent(agent)?;
        log::debug!("Registered agent {} ({})", agent.agent_id, agent.department);
        Ok(())
    }

    pub fn set_agent_active(&self, store: &DeskStore, agent_id: &str, active: bool) -> DeskResult<()> {
        store.set_agent_active(agent_id, active)?;
        log::info!("Agent {agent_id} is now {}", if active { "active" } else { "inactive" });
        Ok(())
    }

    pub fn agent_workload(&self, store: &DeskStore, agent_id: &str) -> DeskResult<AgentWorkload> {
        let agent = store.get_agent(agent_id)?;
        Ok(AgentWorkload {
            assigned: store.agent_assigned_set(agent_id)?,
            open: store.agent_open_workload(agent_id)?,
            max_per_agent: self.limit_for(agent.department),
            agent_id: agent.agent_id,
        })
    }

    // ── Binding ────────────────────────────────────────────────────

    /// Add `complaint_id` to the agent's set on its own, outside any
    /// complaint write. `ComplaintLifecycle::assign` is the entry point that
    /// also moves the complaint; this only does the workload bookkeeping.
    pub fn assign(
        &self,
        store: &DeskStore,
        agent_id: &str,
        complaint_id: &str,
        at: Timestamp,
    ) -> DeskResult<AssignmentOutcome> {
        store.write_txn(|conn| {
            if !complaint_exists_in(conn, complaint_id)? {
                return Err(DeskError::not_found("Complaint", complaint_id));
            }
            self.bind(conn, agent_id, complaint_id, None, at)
        })
    }

    /// Validate the agent and update the assignment set inside the caller's
    /// transaction. `previous` loses its membership when it differs from
    /// `agent_id`.
    pub(crate) fn bind(
        &self,
        conn: &Connection,
        agent_id: &str,
        complaint_id: &str,
        previous: Option<&str>,
        at: Timestamp,
    ) -> DeskResult<AssignmentOutcome> {
        let agent = find_agent_in(conn, agent_id)?
            .ok_or_else(|| DeskError::not_found("Agent", agent_id))?;
        if !agent.is_active {
            return Err(DeskError::InvalidState(format!("Agent '{agent_id}' is not active")));
        }

        let mut over_capacity = false;
        let newly_added = if is_member_in(conn, agent_id, complaint_id)? {
            false
        } else {
            if let Some(max) = self.limit_for(agent.department) {
                let open = open_workload_in(conn, agent_id)?;
                if open >= max {
                    match self.policy {
                        CapacityPolicy::Reject => {
                            return Err(DeskError::Capacity {
                                agent_id: agent_id.to_string(),
                                open,
                                max,
                            });
                        }
                        CapacityPolicy::Warn => {
                            log::warn!(
                                "Agent {agent_id} over capacity ({open}/{max}); assigning {complaint_id} anyway"
                            );
                            over_capacity = true;
                        }
                    }
                }
            }
            add_membership_in(conn, agent_id, complaint_id, at)?
        };

        if let Some(prev) = previous.filter(|p| *p != agent_id) {
            remove_membership_in(conn, prev, complaint_id)?;
        }

        Ok(AssignmentOutcome {
            agent,
            newly_added,
            over_capacity,
        })
    }
}
