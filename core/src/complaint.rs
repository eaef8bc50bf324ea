//! Complaint aggregate: the central entity of the desk.
//!
//! Fields are crate-private: outside this crate a complaint can only be
//! read, never written. Inside the crate, only `lifecycle` mutates one,
//! and every mutation it makes is paired with a timeline append.

use crate::{
    error::{DeskError, DeskResult},
    timeline::{Timeline, TimelineAction},
    types::{ActorId, AgentId, ComplaintCode, Timestamp},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const MAX_TITLE_LEN: usize = 200;

// ── Closed enumerations ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Department {
    #[serde(rename = "ORM")]
    Orm,
    #[serde(rename = "RRM")]
    Rrm,
    #[serde(rename = "CRM")]
    Crm,
    #[serde(rename = "IT")]
    It,
    #[serde(rename = "PROJECT")]
    Project,
    /// Bucket for persisted records whose department code is not recognised.
    /// Never accepted at intake.
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Department {
    /// The fixed departments, in reporting order.
    pub const ALL: [Department; 5] = [
        Department::Orm,
        Department::Rrm,
        Department::Crm,
        Department::It,
        Department::Project,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Orm     => "ORM",
            Self::Rrm     => "RRM",
            Self::Crm     => "CRM",
            Self::It      => "IT",
            Self::Project => "PROJECT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse an intake code. Case-insensitive; `UNKNOWN` is not a valid intake value.
    pub fn parse(code: &str) -> Option<Self> {
        let upper = code.trim().to_ascii_uppercase();
        Self::ALL.into_iter().find(|d| d.code() == upper)
    }

    /// Parse a persisted code, bucketing anything unrecognised.
    pub fn parse_lenient(code: &str) -> Self {
        Self::parse(code).unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Department {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    #[serde(rename = "Service Quality")]
    ServiceQuality,
    #[serde(rename = "Technical Issues")]
    TechnicalIssues,
    #[serde(rename = "Billing")]
    Billing,
    #[serde(rename = "Delivery")]
    Delivery,
    #[serde(rename = "Communication")]
    Communication,
    #[serde(rename = "Other")]
    Other,
    #[serde(rename = "Unknown")]
    Unknown,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::ServiceQuality,
        Category::TechnicalIssues,
        Category::Billing,
        Category::Delivery,
        Category::Communication,
        Category::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::ServiceQuality  => "Service Quality",
            Self::TechnicalIssues => "Technical Issues",
            Self::Billing         => "Billing",
            Self::Delivery        => "Delivery",
            Self::Communication   => "Communication",
            Self::Other           => "Other",
            Self::Unknown         => "Unknown",
        }
    }

    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(label))
    }

    pub fn parse_lenient(label: &str) -> Self {
        Self::parse(label).unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Priority tier. Declaration order is severity order, so `Ord` can be
/// used to assert that escalation never lowers a priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Critical, Priority::High, Priority::Medium, Priority::Low];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Low      => "low",
            Self::Medium   => "medium",
            Self::High     => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code.trim())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "in-progress")]
    InProgress,
    #[serde(rename = "resolved")]
    Resolved,
    #[serde(rename = "escalated")]
    Escalated,
    #[serde(rename = "closed")]
    Closed,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Pending,
        Status::InProgress,
        Status::Resolved,
        Status::Escalated,
        Status::Closed,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Pending    => "pending",
            Self::InProgress => "in-progress",
            Self::Resolved   => "resolved",
            Self::Escalated  => "escalated",
            Self::Closed     => "closed",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code.trim())
    }

    /// Resolved or closed: the SLA clock no longer runs.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// ── Value blocks ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reporter {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SlaBlock {
    pub response_budget_hours: u32,
    pub resolution_budget_hours: u32,
    pub response_deadline: Timestamp,
    pub resolution_deadline: Timestamp,
    pub is_breached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub resolved_by: ActorId,
    pub resolved_at: Timestamp,
    pub resolution_note: Option<String>,
    pub satisfaction_rating: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub user: ActorId,
    pub comment: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub filename: String,
    pub url: String,
    pub uploaded_at: Timestamp,
}

// ── Aggregate ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Complaint {
    pub(crate) complaint_id: ComplaintCode,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) department: Department,
    pub(crate) category: Category,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) priority: Priority,
    pub(crate) status: Status,
    pub(crate) reported_by: Reporter,
    pub(crate) assigned_to: Option<AgentId>,
    pub(crate) sla: SlaBlock,
    pub(crate) resolution: Option<Resolution>,
    pub(crate) timeline: Timeline,
    pub(crate) comments: Vec<Comment>,
    pub(crate) attachments: Vec<Attachment>,
    pub(crate) is_archived: bool,
    pub(crate) created_at: Timestamp,
    pub(crate) updated_at: Timestamp,
    /// Optimistic-concurrency token; bumped by the store on every write.
    #[serde(skip)]
    pub(crate) version: i64,
}

impl Complaint {
    /// Build a freshly filed complaint in `pending`, with its `created` entry.
    pub(crate) fn file(
        complaint_id: ComplaintCode,
        intake: ValidatedComplaint,
        priority: Priority,
        sla: SlaBlock,
        now: Timestamp,
    ) -> Self {
        let mut timeline = Timeline::new();
        timeline.append(TimelineAction::Created, None, now, "Complaint created");
        Self {
            complaint_id,
            title: intake.title,
            description: intake.description,
            department: intake.department,
            category: intake.category,
            tags: intake.tags,
            priority,
            status: Status::Pending,
            reported_by: intake.reporter,
            assigned_to: None,
            sla,
            resolution: None,
            timeline,
            comments: Vec::new(),
            attachments: Vec::new(),
            is_archived: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn complaint_id(&self) -> &str { &self.complaint_id }
    pub fn title(&self) -> &str { &self.title }
    pub fn description(&self) -> &str { &self.description }
    pub fn department(&self) -> Department { self.department }
    pub fn category(&self) -> Category { self.category }
    pub fn tags(&self) -> &BTreeSet<String> { &self.tags }
    pub fn priority(&self) -> Priority { self.priority }
    pub fn status(&self) -> Status { self.status }
    pub fn reported_by(&self) -> &Reporter { &self.reported_by }
    pub fn assigned_to(&self) -> Option<&str> { self.assigned_to.as_deref() }
    pub fn sla(&self) -> &SlaBlock { &self.sla }
    pub fn resolution(&self) -> Option<&Resolution> { self.resolution.as_ref() }
    pub fn timeline(&self) -> &Timeline { &self.timeline }
    pub fn comments(&self) -> &[Comment] { &self.comments }
    pub fn attachments(&self) -> &[Attachment] { &self.attachments }
    pub fn is_archived(&self) -> bool { self.is_archived }
    pub fn created_at(&self) -> Timestamp { self.created_at }
    pub fn updated_at(&self) -> Timestamp { self.updated_at }
    pub fn version(&self) -> i64 { self.version }

    /// Days between filing and resolution, when resolved.
    pub fn resolution_time_days(&self) -> Option<f64> {
        self.resolution.as_ref().map(|r| {
            (r.resolved_at - self.created_at).num_milliseconds() as f64 / MILLIS_PER_DAY
        })
    }

    pub fn satisfaction_rating(&self) -> Option<u8> {
        self.resolution.as_ref().and_then(|r| r.satisfaction_rating)
    }
}

const MILLIS_PER_DAY: f64 = 24.0 * 60.0 * 60.0 * 1000.0;

// ── Intake ───────────────────────────────────────────────────────────────────

/// Raw intake payload, as handed over by the external request layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComplaint {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub reported_by: NewReporter,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicit tier. The classifier never produces `low`; this is the only way to get it.
    #[serde(default)]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReporter {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Intake that passed validation: trimmed, typed, ready to file.
#[derive(Debug, Clone)]
pub struct ValidatedComplaint {
    pub title: String,
    pub description: String,
    pub department: Department,
    pub category: Category,
    pub reporter: Reporter,
    pub tags: BTreeSet<String>,
    pub priority: Option<Priority>,
}

impl NewComplaint {
    pub fn validate(self) -> DeskResult<ValidatedComplaint> {
        let title = validate_title(&self.title)?;
        let description = validate_description(&self.description)?;

        if self.department.trim().is_empty() {
            return Err(DeskError::Validation("Department is required".into()));
        }
        let department = Department::parse(&self.department).ok_or_else(|| {
            DeskError::Validation(format!("Unknown department '{}'", self.department.trim()))
        })?;

        if self.category.trim().is_empty() {
            return Err(DeskError::Validation("Category is required".into()));
        }
        let category = Category::parse(&self.category).ok_or_else(|| {
            DeskError::Validation(format!("Unknown category '{}'", self.category.trim()))
        })?;

        let name = self.reported_by.name.trim();
        if name.is_empty() {
            return Err(DeskError::Validation("Reporter name is required".into()));
        }
        let email = self.reported_by.email.trim().to_lowercase();
        if email.is_empty() {
            return Err(DeskError::Validation("Reporter email is required".into()));
        }
        if !is_valid_email(&email) {
            return Err(DeskError::Validation("Please provide a valid email".into()));
        }

        Ok(ValidatedComplaint {
            title,
            description,
            department,
            category,
            reporter: Reporter {
                name: name.to_string(),
                email,
                phone: non_blank(self.reported_by.phone),
                user_id: non_blank(self.reported_by.user_id),
            },
            tags: normalize_tags(self.tags),
            priority: self.priority,
        })
    }
}

/// Descriptive edit. Status, priority and SLA are deliberately absent:
/// those only move through the state machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl ComplaintUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.category.is_none()
            && self.tags.is_none()
    }
}

pub(crate) fn validate_title(raw: &str) -> DeskResult<String> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(DeskError::Validation("Complaint title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(DeskError::Validation(format!(
            "Title cannot exceed {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

pub(crate) fn validate_description(raw: &str) -> DeskResult<String> {
    let description = raw.trim();
    if description.is_empty() {
        return Err(DeskError::Validation("Complaint description is required".into()));
    }
    Ok(description.to_string())
}

pub(crate) fn normalize_tags(tags: Vec<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Same acceptance as `^\S+@\S+\.\S+$`: no whitespace, something before
/// an `@`, then at least one character, a dot, and at least one more.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some(at) = email.find('@').filter(|&at| at > 0) else {
        return false;
    };
    email
        .match_indices('.')
        .any(|(dot, _)| dot >= at + 2 && dot + 1 < email.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intake() -> NewComplaint {
        NewComplaint {
            title: "  Gas meter reading wrong ".into(),
            description: "Bill shows double the usual consumption".into(),
            department: "crm".into(),
            category: "billing".into(),
            reported_by: NewReporter {
                name: "Asha Rao".into(),
                email: "Asha.Rao@Example.COM".into(),
                phone: Some("  ".into()),
                user_id: None,
            },
            tags: vec!["meter".into(), " meter ".into(), "".into()],
            priority: None,
        }
    }

    #[test]
    fn validation_normalizes_intake() {
        let v = intake().validate().unwrap();
        assert_eq!(v.title, "Gas meter reading wrong");
        assert_eq!(v.department, Department::Crm);
        assert_eq!(v.category, Category::Billing);
        assert_eq!(v.reporter.email, "asha.rao@example.com");
        assert_eq!(v.reporter.phone, None);
        assert_eq!(v.tags.len(), 1);
    }

    #[test]
    fn rejects_unknown_department_and_long_title() {
        let mut bad = intake();
        bad.department = "FINANCE".into();
        assert!(matches!(bad.validate(), Err(DeskError::Validation(_))));

        let mut long = intake();
        long.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(matches!(long.validate(), Err(DeskError::Validation(_))));
    }

    #[test]
    fn email_shape() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("a@b."));
        assert!(!is_valid_email("a@.c"));
        // Anything non-blank may follow the dot, including another dot.
        assert!(is_valid_email("a@b.c."));
        assert!(is_valid_email("a@b@c.d"));
    }
}
