//! Processing run query operations.
//!
//! A run moves `created -> expanding -> running -> completed | failed`.
//! Transitions are guarded by conditional UPDATEs so a stale caller cannot
//! move a run backwards.

use altsmith_common::{ClientId, Error, Result, RunId, RunScope, RunStatus, TriggerSource};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::column_error;
use crate::models::Run;

const RUN_COLUMNS: &str = "id, trigger_source, scope, client_id, status, error,
                total, processed, skipped, failed, deferred, started_at, completed_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<Run> {
    let scope = match row.get::<_, String>(2)?.as_str() {
        "all" => RunScope::All,
        _ => RunScope::Client(
            ClientId::parse(row.get::<_, String>(3)?).map_err(|e| column_error(3, e))?,
        ),
    };

    Ok(Run {
        id: RunId::parse(&row.get::<_, String>(0)?).map_err(|e| column_error(0, e))?,
        trigger: row
            .get::<_, String>(1)?
            .parse()
            .unwrap_or(TriggerSource::Manual),
        scope,
        status: row
            .get::<_, String>(4)?
            .parse()
            .unwrap_or(RunStatus::Failed),
        error: row.get(5)?,
        total: row.get(6)?,
        processed: row.get(7)?,
        skipped: row.get(8)?,
        failed: row.get(9)?,
        deferred: row.get(10)?,
        started_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(11)?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        completed_at: row
            .get::<_, Option<String>>(12)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

/// Create a new run in the `created` state.
pub fn create_run(conn: &Connection, trigger: TriggerSource, scope: &RunScope) -> Result<Run> {
    let id = RunId::new();
    let now = Utc::now();
    let (scope_kind, client_id) = match scope {
        RunScope::All => ("all", None),
        RunScope::Client(id) => ("client", Some(id.as_str())),
    };

    conn.execute(
        "INSERT INTO runs (id, trigger_source, scope, client_id, status, started_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            id.to_string(),
            trigger.to_string(),
            scope_kind,
            client_id,
            RunStatus::Created.to_string(),
            now.to_rfc3339(),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(Run {
        id,
        trigger,
        scope: scope.clone(),
        status: RunStatus::Created,
        error: None,
        total: 0,
        processed: 0,
        skipped: 0,
        failed: 0,
        deferred: 0,
        started_at: now,
        completed_at: None,
    })
}

/// Get a run by ID.
pub fn get_run(conn: &Connection, id: RunId) -> Result<Run> {
    conn.query_row(
        &format!("SELECT {} FROM runs WHERE id = ?", RUN_COLUMNS),
        [id.to_string()],
        run_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("run"),
        _ => Error::database(e.to_string()),
    })
}

/// List the most recent runs, newest first.
pub fn list_recent_runs(conn: &Connection, limit: usize) -> Result<Vec<Run>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM runs ORDER BY started_at DESC LIMIT ?",
            RUN_COLUMNS
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let runs = stmt
        .query_map([limit as i64], run_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(runs)
}

/// Move a run from `created` to `expanding`.
pub fn mark_expanding(conn: &Connection, id: RunId) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE runs SET status = 'expanding' WHERE id = ? AND status = 'created'",
            [id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("run"));
    }

    Ok(())
}

/// Move a run from `expanding` to `running`, recording the admitted job count.
pub fn mark_running(conn: &Connection, id: RunId, total: i64) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE runs SET status = 'running', total = ?
             WHERE id = ? AND status = 'expanding'",
            params![total, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("run"));
    }

    Ok(())
}

/// Complete a run once every job has reached a terminal state.
///
/// `error` carries a note for runs that finished abnormally (e.g. cancelled
/// by an operator) without being scope-level failures.
pub fn complete_run(conn: &Connection, id: RunId, error: Option<&str>) -> Result<()> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE runs SET status = 'completed', error = ?, completed_at = ?
             WHERE id = ? AND status IN ('created', 'expanding', 'running')",
            params![error, now.to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("run"));
    }

    Ok(())
}

/// Fail a run at scope level (e.g. every client listing was unreachable).
pub fn fail_run(conn: &Connection, id: RunId, error: &str) -> Result<()> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE runs SET status = 'failed', error = ?, completed_at = ?
             WHERE id = ? AND status IN ('created', 'expanding', 'running')",
            params![error, now.to_rfc3339(), id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("run"));
    }

    Ok(())
}

/// Counter columns that can be bumped as jobs finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCounter {
    Processed,
    Skipped,
    Failed,
    Deferred,
}

impl RunCounter {
    fn column(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
        }
    }
}

/// Add `n` to one of the run's counters.
pub fn bump_counter(conn: &Connection, id: RunId, counter: RunCounter, n: i64) -> Result<()> {
    let col = counter.column();
    let affected = conn
        .execute(
            &format!("UPDATE runs SET {col} = {col} + ? WHERE id = ?"),
            params![n, id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("run"));
    }

    Ok(())
}

/// Fail any runs left non-terminal by a previous process (crash recovery).
/// Returns the number of runs failed.
pub fn fail_interrupted_runs(conn: &Connection) -> Result<usize> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "UPDATE runs SET status = 'failed', error = 'interrupted by restart', completed_at = ?
             WHERE status IN ('created', 'expanding', 'running')",
            params![now.to_rfc3339()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected)
}

/// Delete terminal runs older than `days`.
pub fn prune_old_runs(conn: &Connection, days: i32) -> Result<usize> {
    let affected = conn
        .execute(
            "DELETE FROM runs
             WHERE status IN ('completed', 'failed')
             AND completed_at < datetime('now', ? || ' days')",
            params![format!("-{}", days)],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected)
}
