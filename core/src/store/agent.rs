use super::{ts, DeskStore};
use crate::{
    assignment::Agent,
    error::{DeskError, DeskResult},
    types::Timestamp,
};
use rusqlite::{params, Connection, OptionalExtension};

fn agent_row_mapper(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        agent_id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        department: row.get(3)?,
        is_active: row.get::<_, i32>(4)? != 0,
    })
}

impl DeskStore {
    // ── Agent directory ────────────────────────────────────────────

    /// Insert or refresh a directory entry. Assignments are left untouched.
    pub fn upsert_agent(&self, agent: &Agent) -> DeskResult<()> {
        self.conn.execute(
            "INSERT INTO agent (agent_id, name, email, department, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (agent_id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                department = excluded.department,
                is_active = excluded.is_active",
            params![
                &agent.agent_id,
                &agent.name,
                &agent.email,
                agent.department,
                if agent.is_active { 1i32 } else { 0i32 },
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, agent_id: &str) -> DeskResult<Agent> {
        self.find_agent(agent_id)?
            .ok_or_else(|| DeskError::not_found("Agent", agent_id))
    }

    pub fn find_agent(&self, agent_id: &str) -> DeskResult<Option<Agent>> {
        find_agent_in(&self.conn, agent_id)
    }

    pub fn list_agents(&self) -> DeskResult<Vec<Agent>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, name, email, department, is_active FROM agent ORDER BY agent_id",
        )?;
        let rows = stmt.query_map([], agent_row_mapper)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn set_agent_active(&self, agent_id: &str, active: bool) -> DeskResult<()> {
        let updated = self.conn.execute(
            "UPDATE agent SET is_active = ?1 WHERE agent_id = ?2",
            params![if active { 1i32 } else { 0i32 }, agent_id],
        )?;
        if updated == 0 {
            return Err(DeskError::not_found("Agent", agent_id));
        }
        Ok(())
    }

    /// The agent's assigned set, oldest assignment first.
    pub fn agent_assigned_set(&self, agent_id: &str) -> DeskResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT complaint_id FROM agent_assignment
             WHERE agent_id = ?1 ORDER BY assigned_at, complaint_id",
        )?;
        let rows = stmt.query_map(params![agent_id], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<Vec<String>>>()
            .map_err(Into::into)
    }

    /// Assigned complaints that are neither resolved nor closed.
    pub fn agent_open_workload(&self, agent_id: &str) -> DeskResult<u32> {
        open_workload_in(&self.conn, agent_id)
    }
}

// ── Connection-level helpers (run inside the caller's transaction) ──

pub(crate) fn find_agent_in(conn: &Connection, agent_id: &str) -> DeskResult<Option<Agent>> {
    conn.query_row(
        "SELECT agent_id, name, email, department, is_active FROM agent WHERE agent_id = ?1",
        params![agent_id],
        agent_row_mapper,
    )
    .optional()
    .map_err(Into::into)
}

pub(crate) fn open_workload_in(conn: &Connection, agent_id: &str) -> DeskResult<u32> {
    let open: u32 = conn.query_row(
        "SELECT COUNT(*) FROM agent_assignment a
         JOIN complaint c ON c.complaint_id = a.complaint_id
         WHERE a.agent_id = ?1 AND c.status NOT IN ('resolved', 'closed')",
        params![agent_id],
        |row| row.get(0),
    )?;
    Ok(open)
}

pub(crate) fn is_member_in(conn: &Connection, agent_id: &str, complaint_id: &str) -> DeskResult<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM agent_assignment WHERE agent_id = ?1 AND complaint_id = ?2",
            params![agent_id, complaint_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Set insert. Returns false when the pair was already present.
pub(crate) fn add_membership_in(
    conn: &Connection,
    agent_id: &str,
    complaint_id: &str,
    at: Timestamp,
) -> DeskResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO agent_assignment (agent_id, complaint_id, assigned_at)
         VALUES (?1, ?2, ?3)",
        params![agent_id, complaint_id, ts(&at)],
    )?;
    Ok(inserted > 0)
}

pub(crate) fn remove_membership_in(conn: &Connection, agent_id: &str, complaint_id: &str) -> DeskResult<()> {
    conn.execute(
        "DELETE FROM agent_assignment WHERE agent_id = ?1 AND complaint_id = ?2",
        params![agent_id, complaint_id],
    )?;
    Ok(())
}
