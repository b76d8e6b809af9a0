//! Dedup ledger query operations.
//!
//! The ledger keeps one row per (client, asset) pair and serves two purposes:
//!
//! 1. **Dedup**: an asset whose recorded `content_hash` is unchanged since the
//!    last success is skipped on later sweeps, so repeat runs cost nothing.
//! 2. **Claims**: the `in_progress` flag is flipped by a conditional upsert,
//!    which guarantees at most one worker (across overlapping runs) touches a
//!    given asset at a time. The same upsert refuses rows already settled
//!    with an identical hash, so a run that expanded before another run
//!    finished the asset skips it instead of rewriting it.

use altsmith_common::{AssetId, ClientId, Error, JobOutcome, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};

use super::column_error;
use crate::models::LedgerEntry;

/// Base delay before a failed asset becomes eligible again.
const RETRY_BASE_MINUTES: i64 = 15;

/// Failed assets are always eligible again after a day.
const RETRY_CAP_HOURS: i64 = 24;

const LEDGER_COLUMNS: &str = "client_id, asset_id, content_hash, outcome, failure_kind,
                attempts, in_progress, provider, updated_at";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        client_id: ClientId::parse(row.get::<_, String>(0)?).map_err(|e| column_error(0, e))?,
        asset_id: AssetId::new(row.get(1)?),
        content_hash: row.get(2)?,
        outcome: row
            .get::<_, Option<String>>(3)?
            .and_then(|s| s.parse().ok()),
        failure_kind: row
            .get::<_, Option<String>>(4)?
            .and_then(|s| s.parse().ok()),
        attempts: row.get(5)?,
        in_progress: row.get(6)?,
        provider: row.get(7)?,
        updated_at: DateTime::parse_from_rfc3339(&row.get::<_, String>(8)?)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Get the ledger entry for an asset, if one exists.
pub fn get_entry(
    conn: &Connection,
    client_id: &ClientId,
    asset_id: AssetId,
) -> Result<Option<LedgerEntry>> {
    match conn.query_row(
        &format!(
            "SELECT {} FROM ledger WHERE client_id = ? AND asset_id = ?",
            LEDGER_COLUMNS
        ),
        params![client_id.as_str(), asset_id.value()],
        entry_from_row,
    ) {
        Ok(entry) => Ok(Some(entry)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// How long a failed asset waits before it may be retried.
///
/// Doubles per consecutive failure starting at 15 minutes, capped at 24 hours.
pub fn retry_backoff(attempts: i64) -> Duration {
    let cap = Duration::hours(RETRY_CAP_HOURS);
    let shift = attempts.saturating_sub(1).clamp(0, 8) as u32;
    let delay = Duration::minutes(RETRY_BASE_MINUTES << shift);
    delay.min(cap)
}

/// Whether an asset should be admitted into a run.
///
/// `None` (never seen) is always admitted. An in-flight claim blocks
/// admission. A recorded success blocks admission unless the content hash
/// changed. A recorded failure is readmitted once its backoff window has
/// elapsed, or immediately if the content changed.
pub fn eligible(entry: Option<&LedgerEntry>, content_hash: &str, now: DateTime<Utc>) -> bool {
    let Some(entry) = entry else {
        return true;
    };
    if entry.in_progress {
        return false;
    }
    match entry.outcome {
        Some(JobOutcome::Done) | Some(JobOutcome::Skipped) => entry.content_hash != content_hash,
        Some(JobOutcome::Failed) => {
            entry.content_hash != content_hash
                || now >= entry.updated_at + retry_backoff(entry.attempts)
        }
        // Interrupted before any outcome was recorded
        None => true,
    }
}

/// Atomically claim an asset for processing.
///
/// Inserts the row (first encounter) or flips `in_progress` on an existing
/// row, but only if no other worker holds the claim and the asset has not
/// settled with the same content hash since the caller checked eligibility.
/// Returns `true` when this caller won the claim; a lost claim means the
/// asset should be skipped, not failed.
pub fn claim(
    conn: &Connection,
    client_id: &ClientId,
    asset_id: AssetId,
    content_hash: &str,
) -> Result<bool> {
    let now = Utc::now();
    let affected = conn
        .execute(
            "INSERT INTO ledger (client_id, asset_id, content_hash, in_progress, updated_at)
             VALUES (?, ?, ?, 1, ?)
             ON CONFLICT(client_id, asset_id) DO UPDATE SET
                 in_progress = 1,
                 updated_at = excluded.updated_at
             WHERE ledger.in_progress = 0
               AND (ledger.outcome IS NULL
                    OR ledger.outcome NOT IN ('done', 'skipped')
                    OR ledger.content_hash <> excluded.content_hash)",
            params![
                client_id.as_str(),
                asset_id.value(),
                content_hash,
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected == 1)
}

/// Release a claim without recording an outcome (e.g. the job was requeued
/// because the rate limiter deferred it).
pub fn release(conn: &Connection, client_id: &ClientId, asset_id: AssetId) -> Result<()> {
    conn.execute(
        "UPDATE ledger SET in_progress = 0, updated_at = ?
         WHERE client_id = ? AND asset_id = ?",
        params![Utc::now().to_rfc3339(), client_id.as_str(), asset_id.value()],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(())
}

/// Record a successful write-back and release the claim.
///
/// Resets the attempt counter so a later transient failure starts the
/// backoff ladder from the bottom.
pub fn record_success(
    conn: &Connection,
    client_id: &ClientId,
    asset_id: AssetId,
    content_hash: &str,
    provider: &str,
) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE ledger SET
                 in_progress = 0,
                 outcome = 'done',
                 failure_kind = NULL,
                 content_hash = ?,
                 provider = ?,
                 attempts = 0,
                 updated_at = ?
             WHERE client_id = ? AND asset_id = ?",
            params![
                content_hash,
                provider,
                Utc::now().to_rfc3339(),
                client_id.as_str(),
                asset_id.value(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("ledger entry"));
    }

    Ok(())
}

/// Record a failed attempt and release the claim.
pub fn record_failure(
    conn: &Connection,
    client_id: &ClientId,
    asset_id: AssetId,
    content_hash: &str,
    failure_kind: altsmith_common::FailureKind,
) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE ledger SET
                 in_progress = 0,
                 outcome = 'failed',
                 failure_kind = ?,
                 content_hash = ?,
                 attempts = attempts + 1,
                 updated_at = ?
             WHERE client_id = ? AND asset_id = ?",
            params![
                failure_kind.to_string(),
                content_hash,
                Utc::now().to_rfc3339(),
                client_id.as_str(),
                asset_id.value(),
            ],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("ledger entry"));
    }

    Ok(())
}

/// Clear claims left behind by a previous process (crash recovery).
/// Returns the number of claims cleared.
pub fn reset_in_flight(conn: &Connection) -> Result<usize> {
    let affected = conn
        .execute(
            "UPDATE ledger SET in_progress = 0, updated_at = ? WHERE in_progress = 1",
            params![Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(affected)
}

/// Count ledger entries for a client grouped by outcome: (done, failed, skipped).
pub fn outcome_counts(conn: &Connection, client_id: &ClientId) -> Result<(i64, i64, i64)> {
    conn.query_row(
        "SELECT
             COALESCE(SUM(outcome = 'done'), 0),
             COALESCE(SUM(outcome = 'failed'), 0),
             COALESCE(SUM(outcome = 'skipped'), 0)
         FROM ledger WHERE client_id = ?",
        [client_id.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .map_err(|e| Error::database(e.to_string()))
}
