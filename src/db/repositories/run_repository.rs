use std::convert::TryFrom;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{named_params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::block::ReasonCode;
use crate::models::input::TriggeredBy;
use crate::models::run::{RunStatus, RunSummary, SchedulingRun};

#[derive(Debug, Clone)]
pub struct RunRow {
    pub seq: i64,
    pub id: String,
    pub user_id: String,
    pub triggered_by: String,
    pub status: String,
    pub reason: Option<String>,
    pub error: Option<String>,
    pub summary: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

impl RunRow {
    pub fn into_run(self) -> AppResult<SchedulingRun> {
        let reason = match self.reason.as_deref() {
            Some(raw) => Some(parse_reason(raw)?),
            None => None,
        };
        let summary = match self.summary.as_deref() {
            Some(raw) if !raw.is_empty() => Some(serde_json::from_str::<RunSummary>(raw)?),
            _ => None,
        };
        Ok(SchedulingRun {
            id: self.id,
            sequence_number: self.seq,
            user_id: self.user_id,
            triggered_by: TriggeredBy::from_str(&self.triggered_by)?,
            status: RunStatus::from_str(&self.status)?,
            reason,
            error: self.error,
            summary,
            started_at: parse_timestamp(&self.started_at)?,
            completed_at: match self.completed_at.as_deref() {
                Some(raw) => Some(parse_timestamp(raw)?),
                None => None,
            },
        })
    }
}

impl TryFrom<&Row<'_>> for RunRow {
    type Error = rusqlite::Error;

    fn try_from(row: &Row<'_>) -> Result<Self, Self::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            triggered_by: row.get("triggered_by")?,
            status: row.get("status")?,
            reason: row.get("reason")?,
            error: row.get("error")?,
            summary: row.get("summary")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::database(format!("invalid timestamp {}: {}", raw, err)))
}

fn parse_reason(raw: &str) -> AppResult<ReasonCode> {
    match raw {
        "INFEASIBLE_HARD" => Ok(ReasonCode::InfeasibleHard),
        "UNSATISFIABLE_CHUNKS" => Ok(ReasonCode::UnsatisfiableChunks),
        "TASKS_LATE" => Ok(ReasonCode::TasksLate),
        "SUPERSEDED_BY_NEWER_RUN" => Ok(ReasonCode::SupersededByNewerRun),
        _ => Err(AppError::database(format!("invalid reason code {}", raw))),
    }
}

const SELECT_COLUMNS: &str = r#"
    seq,
    id,
    user_id,
    triggered_by,
    status,
    reason,
    error,
    summary,
    started_at,
    completed_at
"#;

pub struct RunRepository;

impl RunRepository {
    /// Insert a new pending run. The sequence number comes back from the
    /// AUTOINCREMENT rowid, assigned atomically by SQLite at insert time.
    pub fn insert_pending(
        conn: &Connection,
        user_id: &str,
        triggered_by: TriggeredBy,
        started_at: DateTime<Utc>,
    ) -> AppResult<SchedulingRun> {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            r#"
                INSERT INTO scheduling_runs (id, user_id, triggered_by, status, started_at)
                VALUES (:id, :user_id, :triggered_by, 'pending', :started_at)
            "#,
            named_params! {
                ":id": &id,
                ":user_id": user_id,
                ":triggered_by": triggered_by.as_str(),
                ":started_at": started_at.to_rfc3339(),
            },
        )?;
        let seq = conn.last_insert_rowid();
        Ok(SchedulingRun {
            id,
            sequence_number: seq,
            user_id: user_id.to_string(),
            triggered_by,
            status: RunStatus::Pending,
            reason: None,
            error: None,
            summary: None,
            started_at,
            completed_at: None,
        })
    }

    pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<SchedulingRun>> {
        let sql = format!(
            "SELECT {} FROM scheduling_runs WHERE id = ?1",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt
            .query_row([id], |row| RunRow::try_from(row))
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn get_by_id(conn: &Connection, id: &str) -> AppResult<SchedulingRun> {
        Self::find_by_id(conn, id)?.ok_or_else(AppError::not_found)
    }

    /// Newest pending run for the user, by sequence.
    pub fn find_pending_for_user(
        conn: &Connection,
        user_id: &str,
    ) -> AppResult<Option<SchedulingRun>> {
        let sql = format!(
            r#"
                SELECT {} FROM scheduling_runs
                WHERE user_id = ?1 AND status = 'pending'
                ORDER BY seq DESC
                LIMIT 1
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let row = stmt
            .query_row([user_id], |row| RunRow::try_from(row))
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    /// All pending or running runs for a user.
    pub fn list_active_for_user(
        conn: &Connection,
        user_id: &str,
    ) -> AppResult<Vec<SchedulingRun>> {
        let sql = format!(
            r#"
                SELECT {} FROM scheduling_runs
                WHERE user_id = ?1 AND status IN ('pending', 'running')
                ORDER BY seq ASC
            "#,
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([user_id], |row| RunRow::try_from(row))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    /// Guarded transition: flips `pending` to `running` and reports whether
    /// this call performed the transition. Any other current status is a
    /// no-op, which makes run execution idempotent.
    pub fn mark_running_if_pending(conn: &Connection, id: &str) -> AppResult<bool> {
        let affected = conn.execute(
            "UPDATE scheduling_runs SET status = 'running' WHERE id = ?1 AND status = 'pending'",
            [id],
        )?;
        Ok(affected == 1)
    }

    pub fn mark_completed(
        conn: &Connection,
        id: &str,
        summary: &RunSummary,
        completed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE scheduling_runs
                SET status = 'completed',
                    reason = :reason,
                    summary = :summary,
                    completed_at = :completed_at
                WHERE id = :id AND status = 'running'
            "#,
            named_params! {
                ":id": id,
                ":reason": summary.reason.map(|r| r.as_str()),
                ":summary": serde_json::to_string(summary)?,
                ":completed_at": completed_at.to_rfc3339(),
            },
        )?;
        if affected == 0 {
            return Err(AppError::conflict("run is not running"));
        }
        Ok(())
    }

    pub fn mark_failed(
        conn: &Connection,
        id: &str,
        reason: Option<ReasonCode>,
        error: Option<&str>,
        completed_at: DateTime<Utc>,
    ) -> AppResult<()> {
        let affected = conn.execute(
            r#"
                UPDATE scheduling_runs
                SET status = 'failed',
                    reason = :reason,
                    error = :error,
                    completed_at = :completed_at
                WHERE id = :id AND status IN ('pending', 'running')
            "#,
            named_params! {
                ":id": id,
                ":reason": reason.map(|r| r.as_str()),
                ":error": error,
                ":completed_at": completed_at.to_rfc3339(),
            },
        )?;
        if affected == 0 {
            return Err(AppError::conflict("run already terminal"));
        }
        Ok(())
    }
}
