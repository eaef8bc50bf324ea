use crate::{
    assignment::Agent,
    complaint::{Department, Priority},
    priority_classifier::KeywordSets,
    sla_policy::{SlaBudget, SlaPolicy},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Departments & capacity ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentSettings {
    pub department_id: Department,
    pub max_complaints_per_agent: u32,
}

/// What happens when an assignment would push an agent past
/// `max_complaints_per_agent`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CapacityPolicy {
    /// Fail with `DeskError::Capacity`.
    Reject,
    /// Assign anyway and log a warning.
    #[default]
    Warn,
}

#[derive(Debug, Clone, Deserialize)]
struct DepartmentsFile {
    #[serde(default)]
    capacity_policy: CapacityPolicy,
    departments: Vec<DepartmentSettings>,
    #[serde(default)]
    agents: Vec<Agent>,
}

// ── SLA table ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct SlaTier {
    priority: Priority,
    response_hours: u32,
    resolution_hours: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct SlaPolicyFile {
    tiers: Vec<SlaTier>,
}

impl SlaPolicyFile {
    fn into_policy(self) -> anyhow::Result<SlaPolicy> {
        let mut budgets: HashMap<Priority, SlaBudget> = HashMap::new();
        for tier in self.tiers {
            let budget = SlaBudget {
                response_hours: tier.response_hours,
                resolution_hours: tier.resolution_hours,
            };
            if budgets.insert(tier.priority, budget).is_some() {
                anyhow::bail!("SLA tier '{}' is defined twice", tier.priority);
            }
        }
        let mut take = |p: Priority| {
            budgets
                .remove(&p)
                .ok_or_else(|| anyhow::anyhow!("SLA tier '{p}' is missing"))
        };
        let policy = SlaPolicy {
            critical: take(Priority::Critical)?,
            high: take(Priority::High)?,
            medium: take(Priority::Medium)?,
            low: take(Priority::Low)?,
        };
        policy.validate()?;
        Ok(policy)
    }
}

// ── Lifecycle knobs ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Permit `resolved -> in-progress`. `closed` stays terminal regardless.
    #[serde(default)]
    pub allow_reopen: bool,
    /// Optimistic-write attempts per operation before giving up with `Conflict`.
    #[serde(default = "default_write_retries")]
    pub max_write_retries: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            allow_reopen: false,
            max_write_retries: default_write_retries(),
        }
    }
}

fn default_write_retries() -> u32 {
    8
}

// ── Root config ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DeskConfig {
    pub keywords: KeywordSets,
    pub sla_policy: SlaPolicy,
    pub departments: HashMap<Department, DepartmentSettings>,
    pub capacity_policy: CapacityPolicy,
    /// Directory entries to register at startup.
    pub agents: Vec<Agent>,
    pub lifecycle: LifecycleConfig,
}

impl DeskConfig {
    /// Load from the data/ directory.
    /// In tests, use DeskConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let keywords_path = format!("{data_dir}/classifier/priority_keywords.json");
        let keywords_content = std::fs::read_to_string(&keywords_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {keywords_path}: {e}"))?;
        let keywords: KeywordSets = serde_json::from_str(&keywords_content)?;

        let sla_path = format!("{data_dir}/sla/sla_policy.json");
        let sla_content = std::fs::read_to_string(&sla_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {sla_path}: {e}"))?;
        let sla_file: SlaPolicyFile = serde_json::from_str(&sla_content)?;
        let sla_policy = sla_file
            .into_policy()
            .map_err(|e| anyhow::anyhow!("Invalid {sla_path}: {e}"))?;

        let dept_path = format!("{data_dir}/departments/departments.json");
        let dept_content = std::fs::read_to_string(&dept_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {dept_path}: {e}"))?;
        let dept_file: DepartmentsFile = serde_json::from_str(&dept_content)?;
        let departments = dept_file
            .departments
            .into_iter()
            .map(|d| (d.department_id, d))
            .collect();

        let lifecycle_path = format!("{data_dir}/lifecycle/lifecycle.json");
        let lifecycle = match std::fs::read_to_string(&lifecycle_path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("{lifecycle_path} not found; using lifecycle defaults");
                LifecycleConfig::default()
            }
            Err(e) => anyhow::bail!("Cannot read {lifecycle_path}: {e}"),
        };

        Ok(Self {
            keywords,
            sla_policy,
            departments,
            capacity_policy: dept_file.capacity_policy,
            agents: dept_file.agents,
            lifecycle,
        })
    }

    /// Config with hardcoded defaults for use in unit tests.
    pub fn default_test() -> Self {
        let limits = [
            (Department::Orm, 25),
            (Department::Rrm, 20),
            (Department::Crm, 30),
            (Department::It, 20),
            (Department::Project, 20),
        ];
        let departments = limits
            .into_iter()
            .map(|(dept, max)| {
                (
                    dept,
                    DepartmentSettings {
                        department_id: dept,
                        max_complaints_per_agent: max,
                    },
                )
            })
            .collect();

        Self {
            keywords: KeywordSets::default(),
            sla_policy: SlaPolicy::default(),
            departments,
            capacity_policy: CapacityPolicy::Reject,
            agents: Vec::new(),
            lifecycle: LifecycleConfig::default(),
        }
    }

    pub fn max_per_agent(&self, department: Department) -> Option<u32> {
        self.departments
            .get(&department)
            .map(|d| d.max_complaints_per_agent)
    }
}
