//! Analytics aggregator: read-side KPIs over a complaint corpus.
//!
//! Every function here is pure: it takes the corpus slice handed to
//! `AnalyticsAggregator::new` (plus a filter or a caller-supplied "now")
//! and computes a projection. Nothing is cached or stored; department and
//! agent metrics are recomputed on every read.
//!
//! RULE: A zero denominator yields 0, never NaN or an error.
//! RULE: Records with an unrecognised department or category are counted in
//! their own `Unknown` bucket, not dropped.

use crate::{
    assignment::Agent,
    complaint::{Category, Complaint, Department, Priority, Status},
    error::{DeskError, DeskResult},
    types::{AgentId, Timestamp},
};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const MONTH_LABELS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

// ── Filters ──────────────────────────────────────────────────────────────────

/// Inclusive `[start, end]` window over `createdAt`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl DateRange {
    pub fn new(start: Timestamp, end: Timestamp) -> DeskResult<Self> {
        if start > end {
            return Err(DeskError::Validation(
                "Start date must not be after end date".into(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Accepts RFC 3339 instants or bare `YYYY-MM-DD` dates (midnight UTC).
    pub fn parse_iso(start: &str, end: &str) -> DeskResult<Self> {
        Self::new(parse_iso_instant(start)?, parse_iso_instant(end)?)
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t <= self.end
    }
}

fn parse_iso_instant(raw: &str) -> DeskResult<Timestamp> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
        .ok_or_else(|| DeskError::Validation(format!("Invalid date '{raw}'")))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CorpusFilter {
    pub date_range: Option<DateRange>,
    pub department: Option<Department>,
}

impl CorpusFilter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from primitive query parameters. The two dates must be
    /// given together.
    pub fn from_iso(
        start: Option<&str>,
        end: Option<&str>,
        department: Option<&str>,
    ) -> DeskResult<Self> {
        let date_range = match (start, end) {
            (Some(s), Some(e)) => Some(DateRange::parse_iso(s, e)?),
            (None, None) => None,
            _ => {
                return Err(DeskError::Validation(
                    "Start and end date must be supplied together".into(),
                ))
            }
        };
        let department = department
            .map(|d| {
                Department::parse(d)
                    .ok_or_else(|| DeskError::Validation(format!("Unknown department '{d}'")))
            })
            .transpose()?;
        Ok(Self {
            date_range,
            department,
        })
    }

    pub fn matches(&self, c: &Complaint) -> bool {
        self.date_range.map_or(true, |r| r.contains(c.created_at()))
            && self.department.map_or(true, |d| c.department() == d)
    }
}

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentBreakdown {
    pub department: Department,
    pub total: u64,
    pub resolved: u64,
    pub pending: u64,
    pub escalated: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardOverview {
    pub total_complaints: u64,
    pub resolved_complaints: u64,
    pub pending_complaints: u64,
    pub escalated_complaints: u64,
    /// Percent, two decimals.
    pub resolution_rate: f64,
    /// Days, two decimals.
    pub avg_resolution_time_days: f64,
    pub department_stats: Vec<DepartmentBreakdown>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentAnalytics {
    pub department: Department,
    pub total: u64,
    pub resolved: u64,
    pub pending: u64,
    pub escalated: u64,
    pub critical: u64,
    pub high: u64,
    pub avg_resolution_time_days: f64,
}

/// One month of the trend pivot: a count column per department seen that month.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendRow {
    pub year: i32,
    pub month: String,
    #[serde(flatten)]
    pub departments: BTreeMap<Department, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategorySlice {
    pub name: Category,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrioritySlice {
    pub priority: Priority,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionTimeStats {
    pub department: Department,
    pub resolved: u64,
    pub avg_time_days: f64,
    pub min_time_days: f64,
    pub max_time_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlaComplianceRow {
    pub department: Department,
    pub total: u64,
    pub breached: u64,
    pub compliant: u64,
    pub compliance_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformance {
    pub agent_id: AgentId,
    /// Joined from the directory; `None` when the agent is not registered.
    pub agent_name: Option<String>,
    pub agent_email: Option<String>,
    pub department: Option<Department>,
    pub total_assigned: u64,
    pub resolved: u64,
    pub pending: u64,
    pub avg_rating: Option<f64>,
    pub avg_resolution_time_days: Option<f64>,
    pub resolution_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomMetric {
    Total,
    ByStatus,
    ByPriority,
    ByDepartment,
}

impl CustomMetric {
    pub fn parse(name: &str) -> DeskResult<Self> {
        match name {
            "total"        => Ok(Self::Total),
            "byStatus"     => Ok(Self::ByStatus),
            "byPriority"   => Ok(Self::ByPriority),
            "byDepartment" => Ok(Self::ByDepartment),
            other => Err(DeskError::Validation(format!("Unknown metric '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupCount<K> {
    pub key: K,
    pub count: u64,
}

/// Only the requested metrics are present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustomRangeReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_status: Option<Vec<GroupCount<Status>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_priority: Option<Vec<GroupCount<Priority>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_department: Option<Vec<GroupCount<Department>>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMetrics {
    pub last_24_hours: u64,
    pub last_hour: u64,
    pub currently_pending: u64,
    pub currently_escalated: u64,
    pub critical_open: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentStats {
    pub department: Department,
    pub total: u64,
    pub pending: u64,
    pub in_progress: u64,
    pub resolved: u64,
    pub escalated: u64,
    pub critical: u64,
    pub avg_resolution_time_days: f64,
    pub avg_satisfaction_rating: f64,
}

/// Flat export row, newest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExportRow {
    #[serde(rename = "ID")]
    pub id: String,
    pub title: String,
    pub department: Department,
    pub status: Status,
    pub priority: Priority,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

// ── Aggregator ───────────────────────────────────────────────────────────────

pub struct AnalyticsAggregator<'a> {
    corpus: &'a [Complaint],
}

impl<'a> AnalyticsAggregator<'a> {
    pub fn new(corpus: &'a [Complaint]) -> Self {
        log::debug!("Analytics pass over {} complaints", corpus.len());
        Self { corpus }
    }

    fn matching<'f>(&self, filter: &'f CorpusFilter) -> impl Iterator<Item = &'a Complaint> + 'f
    where
        'a: 'f,
    {
        self.corpus.iter().filter(move |c| filter.matches(c))
    }

    pub fn dashboard_overview(&self, filter: &CorpusFilter) -> DashboardOverview {
        let mut overview = DashboardOverview::default();
        let mut by_dept: BTreeMap<Department, DepartmentBreakdown> = BTreeMap::new();
        let mut resolution_days = Vec::new();

        for c in self.matching(filter) {
            let row = by_dept.entry(c.department()).or_insert_with(|| DepartmentBreakdown {
                department: c.department(),
                total: 0,
                resolved: 0,
                pending: 0,
                escalated: 0,
            });
            overview.total_complaints += 1;
            row.total += 1;
            match c.status() {
                Status::Resolved => {
                    overview.resolved_complaints += 1;
                    row.resolved += 1;
                    if let Some(days) = c.resolution_time_days() {
                        resolution_days.push(days);
                    }
                }
                Status::Pending => {
                    overview.pending_complaints += 1;
                    row.pending += 1;
                }
                Status::Escalated => {
                    overview.escalated_complaints += 1;
                    row.escalated += 1;
                }
                Status::InProgress | Status::Closed => {}
            }
        }

        overview.resolution_rate = round2(rate(overview.resolved_complaints, overview.total_complaints));
        overview.avg_resolution_time_days = round2(mean(&resolution_days).unwrap_or(0.0));
        overview.department_stats = by_dept.into_values().collect();
        overview
    }

    /// One row per fixed department (zeros when empty), plus an `Unknown`
    /// row when such records exist.
    pub fn department_analytics(&self) -> Vec<DepartmentAnalytics> {
        let mut departments: Vec<Department> = Department::ALL.to_vec();
        if self.corpus.iter().any(|c| c.department() == Department::Unknown) {
            departments.push(Department::Unknown);
        }
        departments
            .into_iter()
            .map(|dept| {
                let rows: Vec<&Complaint> =
                    self.corpus.iter().filter(|c| c.department() == dept).collect();
                let days: Vec<f64> = rows.iter().filter_map(|c| c.resolution_time_days()).collect();
                DepartmentAnalytics {
                    department: dept,
                    total: rows.len() as u64,
                    resolved: count(&rows, |c| c.status() == Status::Resolved),
                    pending: count(&rows, |c| c.status() == Status::Pending),
                    escalated: count(&rows, |c| c.status() == Status::Escalated),
                    critical: count(&rows, |c| c.priority() == Priority::Critical),
                    high: count(&rows, |c| c.priority() == Priority::High),
                    avg_resolution_time_days: mean(&days).unwrap_or(0.0),
                }
            })
            .collect()
    }

    /// Complaints created in the last `months_back` calendar months before
    /// `now`, one row per (year, month) in chronological order.
    pub fn trend_analysis(&self, months_back: u32, now: Timestamp) -> Vec<TrendRow> {
        let since = now
            .checked_sub_months(Months::new(months_back))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut buckets: BTreeMap<(i32, u32), BTreeMap<Department, u64>> = BTreeMap::new();
        for c in self.corpus.iter().filter(|c| c.created_at() >= since) {
            let created = c.created_at();
            *buckets
                .entry((created.year(), created.month()))
                .or_default()
                .entry(c.department())
                .or_default() += 1;
        }
        buckets
            .into_iter()
            .map(|((year, month), departments)| TrendRow {
                year,
                month: MONTH_LABELS[(month - 1) as usize].to_string(),
                departments,
            })
            .collect()
    }

    /// Descending by count; ties in category order.
    pub fn category_distribution(&self) -> Vec<CategorySlice> {
        let mut counts: BTreeMap<Category, u64> = BTreeMap::new();
        for c in self.corpus {
            *counts.entry(c.category()).or_default() += 1;
        }
        let mut slices: Vec<CategorySlice> = counts
            .into_iter()
            .map(|(name, value)| CategorySlice { name, value })
            .collect();
        slices.sort_by(|a, b| b.value.cmp(&a.value).then(a.name.cmp(&b.name)));
        slices
    }

    /// Tiers present in the corpus, most severe first.
    pub fn priority_distribution(&self) -> Vec<PrioritySlice> {
        Priority::ALL
            .into_iter()
            .map(|priority| PrioritySlice {
                priority,
                count: self.corpus.iter().filter(|c| c.priority() == priority).count() as u64,
            })
            .filter(|s| s.count > 0)
            .collect()
    }

    pub fn resolution_time_analysis(&self) -> Vec<ResolutionTimeStats> {
        let mut by_dept: BTreeMap<Department, Vec<f64>> = BTreeMap::new();
        for c in self.corpus.iter().filter(|c| c.status() == Status::Resolved) {
            if let Some(days) = c.resolution_time_days() {
                by_dept.entry(c.department()).or_default().push(days);
            }
        }
        by_dept
            .into_iter()
            .map(|(department, days)| ResolutionTimeStats {
                department,
                resolved: days.len() as u64,
                avg_time_days: mean(&days).unwrap_or(0.0),
                min_time_days: days.iter().copied().fold(f64::INFINITY, f64::min),
                max_time_days: days.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            })
            .collect()
    }

    pub fn sla_compliance(&self) -> Vec<SlaComplianceRow> {
        let mut by_dept: BTreeMap<Department, (u64, u64)> = BTreeMap::new();
        for c in self.corpus {
            let (total, breached) = by_dept.entry(c.department()).or_default();
            *total += 1;
            if c.sla().is_breached {
                *breached += 1;
            }
        }
        by_dept
            .into_iter()
            .map(|(department, (total, breached))| SlaComplianceRow {
                department,
                total,
                breached,
                compliant: total - breached,
                compliance_rate: rate(total - breached, total),
            })
            .collect()
    }

    /// Per current assignee. Sorted by resolution rate, highest first; ties
    /// by agent id.
    pub fn agent_performance(
        &self,
        department: Option<Department>,
        directory: &[Agent],
    ) -> Vec<AgentPerformance> {
        let mut by_agent: BTreeMap<&str, Vec<&Complaint>> = BTreeMap::new();
        for c in self.corpus {
            if department.is_some_and(|d| c.department() != d) {
                continue;
            }
            if let Some(agent_id) = c.assigned_to() {
                by_agent.entry(agent_id).or_default().push(c);
            }
        }
        let directory: HashMap<&str, &Agent> =
            directory.iter().map(|a| (a.agent_id.as_str(), a)).collect();

        let mut rows: Vec<AgentPerformance> = by_agent
            .into_iter()
            .map(|(agent_id, assigned)| {
                let known = directory.get(agent_id);
                let total = assigned.len() as u64;
                let resolved = count(&assigned, |c| c.status() == Status::Resolved);
                let ratings: Vec<f64> = assigned
                    .iter()
                    .filter_map(|c| c.satisfaction_rating())
                    .map(f64::from)
                    .collect();
                let days: Vec<f64> = assigned.iter().filter_map(|c| c.resolution_time_days()).collect();
                AgentPerformance {
                    agent_id: agent_id.to_string(),
                    agent_name: known.map(|a| a.name.clone()),
                    agent_email: known.map(|a| a.email.clone()),
                    department: known.map(|a| a.department),
                    total_assigned: total,
                    resolved,
                    pending: count(&assigned, |c| c.status() == Status::Pending),
                    avg_rating: mean(&ratings).map(round2),
                    avg_resolution_time_days: mean(&days).map(round2),
                    resolution_rate: rate(resolved, total),
                }
            })
            .collect();
        rows.sort_by(|a, b| {
            b.resolution_rate
                .total_cmp(&a.resolution_rate)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        rows
    }

    /// The requested subset of metrics over `range` and `departments`
    /// (empty means every department). Any unknown metric name fails the
    /// whole request.
    pub fn custom_range_analytics(
        &self,
        range: DateRange,
        departments: &[Department],
        metrics: &[String],
    ) -> DeskResult<CustomRangeReport> {
        let wanted = metrics
            .iter()
            .map(|m| CustomMetric::parse(m))
            .collect::<DeskResult<Vec<_>>>()?;
        let rows: Vec<&Complaint> = self
            .corpus
            .iter()
            .filter(|c| range.contains(c.created_at()))
            .filter(|c| departments.is_empty() || departments.contains(&c.department()))
            .collect();

        let mut report = CustomRangeReport::default();
        for metric in wanted {
            match metric {
                CustomMetric::Total => report.total = Some(rows.len() as u64),
                CustomMetric::ByStatus => {
                    report.by_status = Some(group_counts(&rows, |c| c.status()))
                }
                CustomMetric::ByPriority => {
                    report.by_priority = Some(
                        Priority::ALL
                            .into_iter()
                            .map(|key| GroupCount {
                                key,
                                count: count(&rows, |c| c.priority() == key),
                            })
                            .filter(|g| g.count > 0)
                            .collect(),
                    )
                }
                CustomMetric::ByDepartment => {
                    report.by_department = Some(group_counts(&rows, |c| c.department()))
                }
            }
        }
        Ok(report)
    }

    pub fn realtime_metrics(&self, now: Timestamp) -> RealtimeMetrics {
        let day_ago = now - Duration::hours(24);
        let hour_ago = now - Duration::hours(1);
        let mut m = RealtimeMetrics::default();
        for c in self.corpus {
            if c.created_at() >= day_ago {
                m.last_24_hours += 1;
            }
            if c.created_at() >= hour_ago {
                m.last_hour += 1;
            }
            match c.status() {
                Status::Pending => m.currently_pending += 1,
                Status::Escalated => m.currently_escalated += 1,
                _ => {}
            }
            if c.priority() == Priority::Critical && !c.status().is_settled() {
                m.critical_open += 1;
            }
        }
        m
    }

    pub fn department_stats(&self, department: Department) -> DepartmentStats {
        let rows: Vec<&Complaint> = self
            .corpus
            .iter()
            .filter(|c| c.department() == department)
            .collect();
        let days: Vec<f64> = rows.iter().filter_map(|c| c.resolution_time_days()).collect();
        let ratings: Vec<f64> = rows
            .iter()
            .filter_map(|c| c.satisfaction_rating())
            .map(f64::from)
            .collect();
        DepartmentStats {
            department,
            total: rows.len() as u64,
            pending: count(&rows, |c| c.status() == Status::Pending),
            in_progress: count(&rows, |c| c.status() == Status::InProgress),
            resolved: count(&rows, |c| c.status() == Status::Resolved),
            escalated: count(&rows, |c| c.status() == Status::Escalated),
            critical: count(&rows, |c| c.priority() == Priority::Critical),
            avg_resolution_time_days: mean(&days).unwrap_or(0.0),
            avg_satisfaction_rating: mean(&ratings).unwrap_or(0.0),
        }
    }

    pub fn export_report(&self, filter: &CorpusFilter) -> Vec<ExportRow> {
        let mut rows: Vec<ExportRow> = self
            .matching(filter)
            .map(|c| ExportRow {
                id: c.complaint_id().to_string(),
                title: c.title().to_string(),
                department: c.department(),
                status: c.status(),
                priority: c.priority(),
                created_at: c.created_at(),
                resolved_at: c.resolution().map(|r| r.resolved_at),
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        rows
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// `part / whole * 100`, or 0 when `whole` is 0.
fn rate(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn count(rows: &[&Complaint], pred: impl Fn(&Complaint) -> bool) -> u64 {
    rows.iter().filter(|c| pred(c)).count() as u64
}

fn group_counts<K: Ord + Copy>(rows: &[&Complaint], key: impl Fn(&Complaint) -> K) -> Vec<GroupCount<K>> {
    let mut counts: BTreeMap<K, u64> = BTreeMap::new();
    for c in rows {
        *counts.entry(key(c)).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(key, count)| GroupCount { key, count })
        .collect()
}
