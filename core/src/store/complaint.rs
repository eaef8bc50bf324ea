use super::{is_unique_violation, parse_opt_ts, parse_ts, ts, DeskStore};
use crate::{
    analytics::CorpusFilter,
    complaint::{Attachment, Comment, Complaint, Reporter, Resolution, SlaBlock},
    error::{DeskError, DeskResult},
    timeline::{Timeline, TimelineEntry},
};
use rusqlite::{params, params_from_iter, types::Type, Connection, OptionalExtension, ToSql};
use std::collections::{BTreeSet, HashMap};

/// Result of an optimistic write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Committed { version: i64 },
    /// Someone else wrote the row since it was read; nothing was written.
    Stale,
}

pub(super) const COMPLAINT_COLUMNS: &str = "
    complaint_id, title, description, department, category, tags, priority, status,
    reporter_name, reporter_email, reporter_phone, reporter_user_id, assigned_to,
    sla_response_hours, sla_resolution_hours, sla_response_deadline, sla_resolution_deadline,
    sla_breached, resolved_by, resolved_at, resolution_note, satisfaction_rating,
    is_archived, created_at, updated_at, version";

// Helper function for mapping complaint rows. Children are attached separately.
pub(super) fn complaint_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<Complaint> {
    let tags_raw: String = row.get(5)?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

    let resolution = match parse_opt_ts(19, row.get(19)?)? {
        Some(resolved_at) => Some(Resolution {
            resolved_by: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
            resolved_at,
            resolution_note: row.get(20)?,
            satisfaction_rating: row.get(21)?,
        }),
        None => None,
    };

    Ok(Complaint {
        complaint_id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        department: row.get(3)?,
        category: row.get(4)?,
        tags,
        priority: row.get(6)?,
        status: row.get(7)?,
        reported_by: Reporter {
            name: row.get(8)?,
            email: row.get(9)?,
            phone: row.get(10)?,
            user_id: row.get(11)?,
        },
        assigned_to: row.get(12)?,
        sla: SlaBlock {
            response_budget_hours: row.get(13)?,
            resolution_budget_hours: row.get(14)?,
            response_deadline: parse_ts(15, &row.get::<_, String>(15)?)?,
            resolution_deadline: parse_ts(16, &row.get::<_, String>(16)?)?,
            is_breached: row.get::<_, i32>(17)? != 0,
        },
        resolution,
        timeline: Timeline::new(),
        comments: Vec::new(),
        attachments: Vec::new(),
        is_archived: row.get::<_, i32>(22)? != 0,
        created_at: parse_ts(23, &row.get::<_, String>(23)?)?,
        updated_at: parse_ts(24, &row.get::<_, String>(24)?)?,
        version: row.get(25)?,
    })
}

impl DeskStore {
    // ── Complaint ──────────────────────────────────────────────────

    /// Insert a freshly filed complaint together with its initial timeline.
    /// A duplicate `complaint_id` surfaces as the raw constraint error so the
    /// caller can retry with a new code.
    pub fn insert_complaint(&self, c: &Complaint) -> DeskResult<()> {
        self.write_txn(|conn| {
            let tags = serde_json::to_string(&c.tags)?;
            conn.execute(
                "INSERT INTO complaint (
                    complaint_id, title, description, department, category, tags, priority,
                    status, reporter_name, reporter_email, reporter_phone, reporter_user_id,
                    assigned_to, sla_response_hours, sla_resolution_hours,
                    sla_response_deadline, sla_resolution_deadline, sla_breached,
                    resolved_by, resolved_at, resolution_note, satisfaction_rating,
                    is_archived, created_at, updated_at, version
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                           ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
                params![
                    &c.complaint_id,
                    &c.title,
                    &c.description,
                    c.department,
                    c.category,
                    tags,
                    c.priority,
                    c.status,
                    &c.reported_by.name,
                    &c.reported_by.email,
                    c.reported_by.phone.as_deref(),
                    c.reported_by.user_id.as_deref(),
                    c.assigned_to.as_deref(),
                    c.sla.response_budget_hours,
                    c.sla.resolution_budget_hours,
                    ts(&c.sla.response_deadline),
                    ts(&c.sla.resolution_deadline),
                    if c.sla.is_breached { 1i32 } else { 0i32 },
                    c.resolution.as_ref().map(|r| r.resolved_by.as_str()),
                    c.resolution.as_ref().map(|r| ts(&r.resolved_at)),
                    c.resolution.as_ref().and_then(|r| r.resolution_note.as_deref()),
                    c.resolution.as_ref().and_then(|r| r.satisfaction_rating),
                    if c.is_archived { 1i32 } else { 0i32 },
                    ts(&c.created_at),
                    ts(&c.updated_at),
                    c.version,
                ],
            )?;
            insert_timeline_in(conn, &c.complaint_id, 0, c.timeline.entries())?;
            insert_comments_in(conn, &c.complaint_id, 0, &c.comments)?;
            insert_attachments_in(conn, &c.complaint_id, 0, &c.attachments)?;
            Ok(())
        })
    }

    pub fn get_complaint(&self, complaint_id: &str) -> DeskResult<Complaint> {
        self.find_complaint(complaint_id)?
            .ok_or_else(|| DeskError::not_found("Complaint", complaint_id))
    }

    pub fn find_complaint(&self, complaint_id: &str) -> DeskResult<Option<Complaint>> {
        self.read_txn(|conn| load_complaint_in(conn, complaint_id))
    }

    pub fn complaint_exists(&self, complaint_id: &str) -> DeskResult<bool> {
        complaint_exists_in(&self.conn, complaint_id)
    }

    /// Persist `after` over `before` if nobody else has written the row since
    /// `before` was read. Timeline, comment and attachment rows past the
    /// lengths in `before` are appended; `within` runs last, in the same
    /// transaction, for bookkeeping that must commit or roll back with it.
    pub(crate) fn save_mutation<F>(
        &self,
        before: &Complaint,
        after: &Complaint,
        within: F,
    ) -> DeskResult<WriteOutcome>
    where
        F: FnOnce(&Connection) -> DeskResult<()>,
    {
        let tx = rusqlite::Transaction::new_unchecked(
            &self.conn,
            rusqlite::TransactionBehavior::Immediate,
        )?;
        let tags = serde_json::to_string(&after.tags)?;
        let updated = tx.execute(
            "UPDATE complaint SET
                title = ?1, description = ?2, category = ?3, tags = ?4, priority = ?5,
                status = ?6, assigned_to = ?7, sla_breached = ?8, resolved_by = ?9,
                resolved_at = ?10, resolution_note = ?11, satisfaction_rating = ?12,
                is_archived = ?13, updated_at = ?14, version = version + 1
             WHERE complaint_id = ?15 AND version = ?16",
            params![
                &after.title,
                &after.description,
                after.category,
                tags,
                after.priority,
                after.status,
                after.assigned_to.as_deref(),
                if after.sla.is_breached { 1i32 } else { 0i32 },
                after.resolution.as_ref().map(|r| r.resolved_by.as_str()),
                after.resolution.as_ref().map(|r| ts(&r.resolved_at)),
                after.resolution.as_ref().and_then(|r| r.resolution_note.as_deref()),
                after.resolution.as_ref().and_then(|r| r.satisfaction_rating),
                if after.is_archived { 1i32 } else { 0i32 },
                ts(&after.updated_at),
                &before.complaint_id,
                before.version,
            ],
        )?;
        if updated == 0 {
            tx.rollback()?;
            return Ok(WriteOutcome::Stale);
        }

        let code = &before.complaint_id;
        insert_timeline_in(&tx, code, before.timeline.len(), after.timeline.since(before.timeline.len()))?;
        insert_comments_in(&tx, code, before.comments.len(), tail(&after.comments, before.comments.len()))?;
        insert_attachments_in(
            &tx,
            code,
            before.attachments.len(),
            tail(&after.attachments, before.attachments.len()),
        )?;
        within(&*tx)?;
        tx.commit()?;
        Ok(WriteOutcome::Committed {
            version: before.version + 1,
        })
    }

    /// Codes of complaints that are still open and not yet flagged as breached.
    pub fn unbreached_open_codes(&self) -> DeskResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT complaint_id FROM complaint
             WHERE status NOT IN ('resolved', 'closed') AND sla_breached = 0
             ORDER BY created_at, complaint_id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(Into::into)
    }

    /// Every complaint matching `filter`, with children, read from one snapshot.
    pub fn load_corpus(&self, filter: &CorpusFilter) -> DeskResult<Vec<Complaint>> {
        self.read_txn(|conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut args: Vec<Box<dyn ToSql>> = Vec::new();
            if let Some(range) = &filter.date_range {
                clauses.push("created_at >= ?");
                args.push(Box::new(ts(&range.start)));
                clauses.push("created_at <= ?");
                args.push(Box::new(ts(&range.end)));
            }
            if let Some(dept) = filter.department {
                clauses.push("department = ?");
                args.push(Box::new(dept));
            }
            let where_sql = if clauses.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", clauses.join(" AND "))
            };
            let sql = format!(
                "SELECT {COMPLAINT_COLUMNS} FROM complaint{where_sql} ORDER BY created_at, complaint_id"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), complaint_row_mapper)?;
            let mut corpus = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            attach_children_bulk_in(conn, &mut corpus)?;
            Ok(corpus)
        })
    }
}

fn tail<T>(items: &[T], from: usize) -> &[T] {
    items.get(from..).unwrap_or(&[])
}

// ── Connection-level helpers (usable inside an open transaction) ──

pub(crate) fn complaint_exists_in(conn: &Connection, complaint_id: &str) -> DeskResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM complaint WHERE complaint_id = ?1",
            params![complaint_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(super) fn load_complaint_in(conn: &Connection, complaint_id: &str) -> DeskResult<Option<Complaint>> {
    let complaint = conn
        .query_row(
            &format!("SELECT {COMPLAINT_COLUMNS} FROM complaint WHERE complaint_id = ?1"),
            params![complaint_id],
            complaint_row_mapper,
        )
        .optional()?;
    match complaint {
        Some(mut c) => {
            attach_children_in(conn, &mut c)?;
            Ok(Some(c))
        }
        None => Ok(None),
    }
}

fn timeline_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, TimelineEntry)> {
    Ok((
        row.get(0)?,
        TimelineEntry {
            action: row.get(1)?,
            performed_by: row.get(2)?,
            timestamp: parse_ts(3, &row.get::<_, String>(3)?)?,
            details: row.get(4)?,
        },
    ))
}

fn comment_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Comment)> {
    Ok((
        row.get(0)?,
        Comment {
            id: row.get(1)?,
            user: row.get(2)?,
            comment: row.get(3)?,
            created_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        },
    ))
}

fn attachment_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, Attachment)> {
    Ok((
        row.get(0)?,
        Attachment {
            id: row.get(1)?,
            filename: row.get(2)?,
            url: row.get(3)?,
            uploaded_at: parse_ts(4, &row.get::<_, String>(4)?)?,
        },
    ))
}

const TIMELINE_SELECT: &str =
    "SELECT complaint_id, action, performed_by, occurred_at, details FROM complaint_timeline";
const COMMENT_SELECT: &str =
    "SELECT complaint_id, comment_id, author, body, created_at FROM complaint_comment";
const ATTACHMENT_SELECT: &str =
    "SELECT complaint_id, attachment_id, filename, url, uploaded_at FROM complaint_attachment";

pub(super) fn attach_children_in(conn: &Connection, c: &mut Complaint) -> DeskResult<()> {
    let code = c.complaint_id.clone();

    let mut stmt = conn.prepare(&format!("{TIMELINE_SELECT} WHERE complaint_id = ?1 ORDER BY seq"))?;
    let entries = stmt
        .query_map(params![code], timeline_row_mapper)?
        .map(|r| r.map(|(_, e)| e))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    c.timeline = Timeline::from_entries(entries);

    let mut stmt = conn.prepare(&format!("{COMMENT_SELECT} WHERE complaint_id = ?1 ORDER BY seq"))?;
    c.comments = stmt
        .query_map(params![code], comment_row_mapper)?
        .map(|r| r.map(|(_, e)| e))
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut stmt = conn.prepare(&format!("{ATTACHMENT_SELECT} WHERE complaint_id = ?1 ORDER BY seq"))?;
    c.attachments = stmt
        .query_map(params![code], attachment_row_mapper)?
        .map(|r| r.map(|(_, e)| e))
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(())
}

/// One pass per child table instead of three queries per complaint.
fn attach_children_bulk_in(conn: &Connection, corpus: &mut [Complaint]) -> DeskResult<()> {
    if corpus.is_empty() {
        return Ok(());
    }
    let mut timelines: HashMap<String, Vec<TimelineEntry>> = HashMap::new();
    let mut stmt = conn.prepare(&format!("{TIMELINE_SELECT} ORDER BY complaint_id, seq"))?;
    for row in stmt.query_map([], timeline_row_mapper)? {
        let (code, entry) = row?;
        timelines.entry(code).or_default().push(entry);
    }

    let mut comments: HashMap<String, Vec<Comment>> = HashMap::new();
    let mut stmt = conn.prepare(&format!("{COMMENT_SELECT} ORDER BY complaint_id, seq"))?;
    for row in stmt.query_map([], comment_row_mapper)? {
        let (code, comment) = row?;
        comments.entry(code).or_default().push(comment);
    }

    let mut attachments: HashMap<String, Vec<Attachment>> = HashMap::new();
    let mut stmt = conn.prepare(&format!("{ATTACHMENT_SELECT} ORDER BY complaint_id, seq"))?;
    for row in stmt.query_map([], attachment_row_mapper)? {
        let (code, attachment) = row?;
        attachments.entry(code).or_default().push(attachment);
    }

    for c in corpus.iter_mut() {
        c.timeline = Timeline::from_entries(timelines.remove(&c.complaint_id).unwrap_or_default());
        c.comments = comments.remove(&c.complaint_id).unwrap_or_default();
        c.attachments = attachments.remove(&c.complaint_id).unwrap_or_default();
    }
    Ok(())
}

fn insert_timeline_in(
    conn: &Connection,
    complaint_id: &str,
    first_seq: usize,
    entries: &[TimelineEntry],
) -> DeskResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO complaint_timeline (complaint_id, seq, action, performed_by, occurred_at, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (i, e) in entries.iter().enumerate() {
        stmt.execute(params![
            complaint_id,
            (first_seq + i) as i64,
            e.action,
            e.performed_by.as_deref(),
            ts(&e.timestamp),
            &e.details,
        ])?;
    }
    Ok(())
}

fn insert_comments_in(
    conn: &Connection,
    complaint_id: &str,
    first_seq: usize,
    comments: &[Comment],
) -> DeskResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO complaint_comment (comment_id, complaint_id, seq, author, body, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (i, c) in comments.iter().enumerate() {
        stmt.execute(params![
            &c.id,
            complaint_id,
            (first_seq + i) as i64,
            &c.user,
            &c.comment,
            ts(&c.created_at),
        ])?;
    }
    Ok(())
}

fn insert_attachments_in(
    conn: &Connection,
    complaint_id: &str,
    first_seq: usize,
    attachments: &[Attachment],
) -> DeskResult<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO complaint_attachment (attachment_id, complaint_id, seq, filename, url, uploaded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (i, a) in attachments.iter().enumerate() {
        stmt.execute(params![
            &a.id,
            complaint_id,
            (first_seq + i) as i64,
            &a.filename,
            &a.url,
            ts(&a.uploaded_at),
        ])?;
    }
    Ok(())
}

/// True when a failed insert collided on an existing complaint code.
pub(crate) fn is_duplicate_code(err: &DeskError) -> bool {
    matches!(err, DeskError::Database(e) if is_unique_violation(e))
}
