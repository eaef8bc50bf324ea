//! Complaint lifecycle: the state machine and its write path.
//!
//! STATE TABLE (checked before any mutation):
//!   pending     -> in-progress, escalated
//!   in-progress -> resolved, escalated
//!   escalated   -> in-progress, resolved
//!   resolved    -> closed (+ in-progress when reopening is allowed)
//!   closed      -> (terminal)
//!
//! RULES:
//!   - Every successful operation appends exactly one timeline entry.
//!   - The state change, SLA flag and timeline append commit in one
//!     transaction; a concurrent writer makes the whole operation re-run
//!     against fresh state.
//!   - Escalation raises priority to critical but never recomputes deadlines.

use crate::{
    assignment::AssignmentService,
    clock::Clock,
    complaint::{
        normalize_tags, validate_description, validate_title, Attachment, Category, Comment,
        Complaint, ComplaintUpdate, NewComplaint, Priority, Resolution, Status,
    },
    config::DeskConfig,
    error::{DeskError, DeskResult},
    priority_classifier::PriorityClassifier,
    rng::TicketCodeGenerator,
    sla_policy::{check_sla_breach, is_past_deadline, SlaPolicy},
    store::{is_duplicate_code, DeskStore, WriteOutcome},
    timeline::TimelineAction,
    types::{AgentId, Timestamp},
};
use std::sync::Arc;

/// Fresh codes drawn before `create` gives up on collisions.
const MAX_CODE_ATTEMPTS: u32 = 16;

// ── Transition table ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransitionTable {
    allow_reopen: bool,
}

impl TransitionTable {
    pub fn new(allow_reopen: bool) -> Self {
        Self { allow_reopen }
    }

    pub fn permitted(&self, from: Status) -> &'static [Status] {
        match from {
            Status::Pending    => &[Status::InProgress, Status::Escalated],
            Status::InProgress => &[Status::Resolved, Status::Escalated],
            Status::Escalated  => &[Status::InProgress, Status::Resolved],
            Status::Resolved if self.allow_reopen => &[Status::Closed, Status::InProgress],
            Status::Resolved   => &[Status::Closed],
            Status::Closed     => &[],
        }
    }

    pub fn allows(&self, from: Status, to: Status) -> bool {
        self.permitted(from).contains(&to)
    }

    pub fn check(&self, from: Status, to: Status) -> DeskResult<()> {
        if self.allows(from, to) {
            Ok(())
        } else {
            Err(DeskError::InvalidTransition { from, to })
        }
    }
}

// ── Operations ───────────────────────────────────────────────────────────────

/// One lifecycle operation, applied in memory by [`apply_op`].
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOp {
    Assign { agent_id: AgentId },
    SetStatus { status: Status },
    Resolve { note: Option<String> },
    Escalate { reason: Option<String> },
    Comment { text: String },
    Attach { filename: String, url: String },
    Rate { rating: u8 },
    UpdateDetails(ComplaintUpdate),
    MarkBreached,
}

/// Guard, mutate and append one timeline entry. Returns `false` only when
/// the operation had nothing to do (a breach check that did not flip);
/// in that case the complaint is untouched.
pub fn apply_op(
    c: &mut Complaint,
    op: &LifecycleOp,
    actor: Option<&str>,
    table: &TransitionTable,
    now: Timestamp,
) -> DeskResult<bool> {
    let from = c.status;
    match op {
        LifecycleOp::Assign { agent_id } => {
            if from.is_settled() {
                return Err(DeskError::InvalidTransition { from, to: Status::InProgress });
            }
            if from != Status::InProgress {
                table.check(from, Status::InProgress)?;
            }
            c.assigned_to = Some(agent_id.clone());
            c.status = Status::InProgress;
            c.timeline.append(
                TimelineAction::Assigned,
                actor,
                now,
                format!("Assigned to {agent_id}"),
            );
        }
        LifecycleOp::SetStatus { status } => {
            let to = *status;
            table.check(from, to)?;
            c.status = to;
            match to {
                Status::Resolved => {
                    c.resolution = Some(Resolution {
                        resolved_by: actor.unwrap_or_default().to_string(),
                        resolved_at: now,
                        resolution_note: None,
                        satisfaction_rating: None,
                    });
                }
                // Reopened: the old resolution no longer describes the complaint.
                Status::InProgress if from == Status::Resolved => c.resolution = None,
                _ => {}
            }
            c.timeline.append(
                TimelineAction::StatusChanged,
                actor,
                now,
                format!("Status changed from {from} to {to}"),
            );
        }
        LifecycleOp::Resolve { note } => {
            if !matches!(from, Status::InProgress | Status::Escalated) {
                return Err(DeskError::InvalidTransition { from, to: Status::Resolved });
            }
            let note = note.as_deref().map(str::trim).filter(|n| !n.is_empty());
            c.status = Status::Resolved;
            c.resolution = Some(Resolution {
                resolved_by: actor.unwrap_or_default().to_string(),
                resolved_at: now,
                resolution_note: note.map(String::from),
                satisfaction_rating: None,
            });
            c.timeline.append(
                TimelineAction::Resolved,
                actor,
                now,
                note.unwrap_or("Complaint resolved"),
            );
        }
        LifecycleOp::Escalate { reason } => {
            if from.is_settled() {
                return Err(DeskError::InvalidTransition { from, to: Status::Escalated });
            }
            c.status = Status::Escalated;
            c.priority = Priority::Critical;
            let reason = reason.as_deref().map(str::trim).filter(|r| !r.is_empty());
            c.timeline.append(
                TimelineAction::Escalated,
                actor,
                now,
                reason.unwrap_or("Complaint escalated"),
            );
        }
        LifecycleOp::Comment { text } => {
            ensure_not_closed(c, "comment on")?;
            let text = text.trim();
            if text.is_empty() {
                return Err(DeskError::Validation("Comment text is required".into()));
            }
            c.comments.push(Comment {
                id: uuid::Uuid::new_v4().to_string(),
                user: actor.unwrap_or_default().to_string(),
                comment: text.to_string(),
                created_at: now,
            });
            c.timeline.append(TimelineAction::CommentAdded, actor, now, "Comment added");
        }
        LifecycleOp::Attach { filename, url } => {
            ensure_not_closed(c, "attach files to")?;
            let filename = filename.trim();
            if filename.is_empty() {
                return Err(DeskError::Validation("Attachment filename is required".into()));
            }
            let url = url.trim();
            if url.is_empty() {
                return Err(DeskError::Validation("Attachment url is required".into()));
            }
            c.attachments.push(Attachment {
                id: uuid::Uuid::new_v4().to_string(),
                filename: filename.to_string(),
                url: url.to_string(),
                uploaded_at: now,
            });
            c.timeline.append(
                TimelineAction::AttachmentAdded,
                actor,
                now,
                format!("Attachment added: {filename}"),
            );
        }
        LifecycleOp::Rate { rating } => {
            if !(1..=5).contains(rating) {
                return Err(DeskError::Validation("Rating must be between 1 and 5".into()));
            }
            let resolution = match (from, c.resolution.as_mut()) {
                (Status::Resolved, Some(r)) => r,
                _ => {
                    return Err(DeskError::InvalidState(format!(
                        "Only resolved complaints can be rated (status is {from})"
                    )))
                }
            };
            resolution.satisfaction_rating = Some(*rating);
            c.timeline.append(TimelineAction::Rated, actor, now, format!("Rated {rating}/5"));
        }
        LifecycleOp::UpdateDetails(update) => {
            ensure_not_closed(c, "edit")?;
            if update.is_empty() {
                return Err(DeskError::Validation("Nothing to update".into()));
            }
            let mut changed = Vec::new();
            if let Some(title) = &update.title {
                c.title = validate_title(title)?;
                changed.push("title");
            }
            if let Some(description) = &update.description {
                c.description = validate_description(description)?;
                changed.push("description");
            }
            if let Some(category) = &update.category {
                c.category = Category::parse(category).ok_or_else(|| {
                    DeskError::Validation(format!("Unknown category '{}'", category.trim()))
                })?;
                changed.push("category");
            }
            if let Some(tags) = &update.tags {
                c.tags = normalize_tags(tags.clone());
                changed.push("tags");
            }
            c.timeline.append(
                TimelineAction::Updated,
                actor,
                now,
                format!("Updated {}", changed.join(", ")),
            );
        }
        LifecycleOp::MarkBreached => {
            if c.sla.is_breached || !check_sla_breach(c, now) {
                return Ok(false);
            }
            let deadline = c.sla.resolution_deadline;
            c.timeline.append(
                TimelineAction::SlaBreached,
                actor,
                now,
                format!("Resolution deadline {} passed", deadline.to_rfc3339()),
            );
        }
    }
    c.updated_at = now;
    Ok(true)
}

fn ensure_not_closed(c: &Complaint, what: &str) -> DeskResult<()> {
    if c.status == Status::Closed {
        return Err(DeskError::InvalidState(format!(
            "Cannot {what} closed complaint '{}'",
            c.complaint_id
        )));
    }
    Ok(())
}

// ── Engine ───────────────────────────────────────────────────────────────────

pub struct ComplaintLifecycle {
    store: DeskStore,
    classifier: PriorityClassifier,
    sla: SlaPolicy,
    assignment: AssignmentService,
    transitions: TransitionTable,
    codes: Arc<TicketCodeGenerator>,
    clock: Arc<dyn Clock>,
    max_write_retries: u32,
}

impl ComplaintLifecycle {
    pub fn new(
        store: DeskStore,
        config: &DeskConfig,
        clock: Arc<dyn Clock>,
        codes: Arc<TicketCodeGenerator>,
    ) -> Self {
        Self {
            store,
            classifier: PriorityClassifier::from_keywords(&config.keywords),
            sla: config.sla_policy.clone(),
            assignment: AssignmentService::from_config(config),
            transitions: TransitionTable::new(config.lifecycle.allow_reopen),
            codes,
            clock,
            max_write_retries: config.lifecycle.max_write_retries.max(1),
        }
    }

    /// In-memory desk with `DeskConfig::default_test()` and a fixed code seed.
    /// Use this in tests instead of wiring a store by hand.
    pub fn build_test(clock: Arc<dyn Clock>) -> DeskResult<Self> {
        let store = DeskStore::in_memory()?;
        store.migrate()?;
        Ok(Self::new(
            store,
            &DeskConfig::default_test(),
            clock,
            Arc::new(TicketCodeGenerator::seeded(42)),
        ))
    }

    /// Same configuration over a fresh connection to the same database,
    /// for handing to another thread.
    pub fn reopen(&self) -> DeskResult<Self> {
        Ok(Self {
            store: self.store.reopen()?,
            classifier: self.classifier.clone(),
            sla: self.sla.clone(),
            assignment: self.assignment.clone(),
            transitions: self.transitions,
            codes: Arc::clone(&self.codes),
            clock: Arc::clone(&self.clock),
            max_write_retries: self.max_write_retries,
        })
    }

    pub fn store(&self) -> &DeskStore {
        &self.store
    }

    pub fn assignment(&self) -> &AssignmentService {
        &self.assignment
    }

    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn get(&self, complaint_id: &str) -> DeskResult<Complaint> {
        self.store.get_complaint(complaint_id)
    }

    /// File a new complaint in `pending`.
    pub fn create(&self, intake: NewComplaint) -> DeskResult<Complaint> {
        let intake = intake.validate()?;
        let priority = intake
            .priority
            .unwrap_or_else(|| self.classifier.classify(&intake.title, &intake.description));
        let now = self.clock.now();
        let sla = self.sla.sla_block(priority, now);

        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = self.codes.next_code();
            let complaint = Complaint::file(code, intake.clone(), priority, sla.clone(), now);
            match self.store.insert_complaint(&complaint) {
                Ok(()) => {
                    log::info!(
                        "Complaint {} filed: {} / {} / {}",
                        complaint.complaint_id(),
                        complaint.department(),
                        complaint.category(),
                        priority
                    );
                    return Ok(complaint);
                }
                Err(e) if is_duplicate_code(&e) => {
                    log::warn!("Complaint code {} already taken; drawing another", complaint.complaint_id());
                }
                Err(e) => return Err(e),
            }
        }
        Err(DeskError::Other(anyhow::anyhow!(
            "no free complaint code after {MAX_CODE_ATTEMPTS} attempts"
        )))
    }

    pub fn assign(&self, complaint_id: &str, agent_id: &str, actor: &str) -> DeskResult<Complaint> {
        let op = LifecycleOp::Assign { agent_id: agent_id.to_string() };
        self.run(complaint_id, Some(actor), &op, None).map(|(c, _)| c)
    }

    pub fn set_status(&self, complaint_id: &str, status: Status, actor: &str) -> DeskResult<Complaint> {
        let op = LifecycleOp::SetStatus { status };
        self.run(complaint_id, Some(actor), &op, None).map(|(c, _)| c)
    }

    pub fn resolve(&self, complaint_id: &str, actor: &str, note: Option<&str>) -> DeskResult<Complaint> {
        let op = LifecycleOp::Resolve { note: note.map(String::from) };
        self.run(complaint_id, Some(actor), &op, None).map(|(c, _)| c)
    }

    pub fn escalate(&self, complaint_id: &str, actor: &str, reason: Option<&str>) -> DeskResult<Complaint> {
        let op = LifecycleOp::Escalate { reason: reason.map(String::from) };
        self.run(complaint_id, Some(actor), &op, None).map(|(c, _)| c)
    }

    pub fn add_comment(&self, complaint_id: &str, actor: &str, text: &str) -> DeskResult<Complaint> {
        let op = LifecycleOp::Comment { text: text.to_string() };
        self.run(complaint_id, Some(actor), &op, None).map(|(c, _)| c)
    }

    pub fn add_attachment(
        &self,
        complaint_id: &str,
        actor: &str,
        filename: &str,
        url: &str,
    ) -> DeskResult<Complaint> {
        let op = LifecycleOp::Attach {
            filename: filename.to_string(),
            url: url.to_string(),
        };
        self.run(complaint_id, Some(actor), &op, None).map(|(c, _)| c)
    }

    /// Satisfaction rating from the reporter; overwrites an earlier rating.
    pub fn rate(&self, complaint_id: &str, rating: u8) -> DeskResult<Complaint> {
        self.run(complaint_id, None, &LifecycleOp::Rate { rating }, None)
            .map(|(c, _)| c)
    }

    pub fn update_details(
        &self,
        complaint_id: &str,
        actor: &str,
        update: ComplaintUpdate,
    ) -> DeskResult<Complaint> {
        self.run(complaint_id, Some(actor), &LifecycleOp::UpdateDetails(update), None)
            .map(|(c, _)| c)
    }

    /// Evaluate the breach predicate at `now` and persist a false -> true
    /// flip. Returns the predicate value; a no-op evaluation writes nothing.
    pub fn check_sla(&self, complaint_id: &str, now: Timestamp) -> DeskResult<bool> {
        let (c, _) = self.run(complaint_id, None, &LifecycleOp::MarkBreached, Some(now))?;
        Ok(is_past_deadline(c.status(), c.sla(), now))
    }

    /// Run the breach check over every open, not-yet-breached complaint.
    /// Returns the codes that flipped.
    pub fn sweep_sla_breaches(&self, now: Timestamp) -> DeskResult<Vec<String>> {
        let mut flipped = Vec::new();
        for code in self.store.unbreached_open_codes()? {
            let (_, written) = self.run(&code, None, &LifecycleOp::MarkBreached, Some(now))?;
            if written {
                flipped.push(code);
            }
        }
        if !flipped.is_empty() {
            log::warn!("SLA sweep: {} complaint(s) newly breached", flipped.len());
        }
        Ok(flipped)
    }

    /// Load, apply, and commit with optimistic concurrency. Re-runs the
    /// whole operation against fresh state when another writer got there
    /// first. The flag is `false` when nothing needed writing.
    fn run(
        &self,
        complaint_id: &str,
        actor: Option<&str>,
        op: &LifecycleOp,
        at: Option<Timestamp>,
    ) -> DeskResult<(Complaint, bool)> {
        for attempt in 1..=self.max_write_retries {
            let before = self.store.get_complaint(complaint_id)?;
            let now = at.unwrap_or_else(|| self.clock.now());
            let mut after = before.clone();
            if !apply_op(&mut after, op, actor, &self.transitions, now)? {
                return Ok((before, false));
            }

            let outcome = match op {
                LifecycleOp::Assign { agent_id } => {
                    let previous = before.assigned_to();
                    self.store.save_mutation(&before, &after, |conn| {
                        let bound = self.assignment.bind(conn, agent_id, complaint_id, previous, now)?;
                        if bound.over_capacity {
                            log::warn!("Complaint {complaint_id} assigned to {agent_id} past capacity");
                        }
                        Ok(())
                    })?
                }
                _ => self.store.save_mutation(&before, &after, |_| Ok(()))?,
            };

            match outcome {
                WriteOutcome::Committed { version } => {
                    after.version = version;
                    if let Some(entry) = after.timeline().last() {
                        log::info!(
                            "Complaint {complaint_id}: {} ({} -> {})",
                            entry.action,
                            before.status(),
                            after.status()
                        );
                    }
                    return Ok((after, true));
                }
                WriteOutcome::Stale => {
                    log::warn!(
                        "Complaint {complaint_id} changed underneath {op:?}; retrying ({attempt}/{})",
                        self.max_write_retries
                    );
                }
            }
        }
        Err(DeskError::Conflict {
            complaint_id: complaint_id.to_string(),
            attempts: self.max_write_retries,
        })
    }
}
