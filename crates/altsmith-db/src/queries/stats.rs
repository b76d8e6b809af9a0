//! Lifetime statistics query operations.

use altsmith_common::{ClientId, Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::column_error;
use crate::models::ClientStats;

fn stats_from_row(row: &Row<'_>) -> rusqlite::Result<ClientStats> {
    Ok(ClientStats {
        client_id: Some(ClientId::parse(row.get::<_, String>(0)?).map_err(|e| column_error(0, e))?),
        processed: row.get(1)?,
        failed: row.get(2)?,
        skipped: row.get(3)?,
        total_latency_ms: row.get(4)?,
        last_run_at: row
            .get::<_, Option<String>>(5)?
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}

fn ensure_row(conn: &Connection, client_id: &ClientId) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO client_stats (client_id) VALUES (?)",
        [client_id.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Record one successfully processed image and its end-to-end latency.
pub fn record_processed(conn: &Connection, client_id: &ClientId, latency_ms: i64) -> Result<()> {
    ensure_row(conn, client_id)?;
    conn.execute(
        "UPDATE client_stats SET
             processed = processed + 1,
             total_latency_ms = total_latency_ms + ?,
             last_run_at = ?
         WHERE client_id = ?",
        params![latency_ms, Utc::now().to_rfc3339(), client_id.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Record one permanently failed image.
pub fn record_failed(conn: &Connection, client_id: &ClientId) -> Result<()> {
    ensure_row(conn, client_id)?;
    conn.execute(
        "UPDATE client_stats SET failed = failed + 1, last_run_at = ? WHERE client_id = ?",
        params![Utc::now().to_rfc3339(), client_id.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Record `n` images skipped by the dedup ledger in one sweep.
pub fn record_skipped(conn: &Connection, client_id: &ClientId, n: i64) -> Result<()> {
    ensure_row(conn, client_id)?;
    conn.execute(
        "UPDATE client_stats SET skipped = skipped + ?, last_run_at = ? WHERE client_id = ?",
        params![n, Utc::now().to_rfc3339(), client_id.as_str()],
    )
    .map_err(|e| Error::database(e.to_string()))?;
    Ok(())
}

/// Lifetime counters for one client. Returns zeroed counters for a client
/// with no recorded activity.
pub fn get_client_stats(conn: &Connection, client_id: &ClientId) -> Result<ClientStats> {
    match conn.query_row(
        "SELECT client_id, processed, failed, skipped, total_latency_ms, last_run_at
         FROM client_stats WHERE client_id = ?",
        [client_id.as_str()],
        stats_from_row,
    ) {
        Ok(stats) => Ok(stats),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(ClientStats {
            client_id: Some(client_id.clone()),
            ..Default::default()
        }),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Lifetime counters for every client that has recorded activity.
pub fn list_client_stats(conn: &Connection) -> Result<Vec<ClientStats>> {
    let mut stmt = conn
        .prepare(
            "SELECT client_id, processed, failed, skipped, total_latency_ms, last_run_at
             FROM client_stats ORDER BY client_id ASC",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let stats = stmt
        .query_map([], stats_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(stats)
}

/// Aggregate counters across all clients.
pub fn global_stats(conn: &Connection) -> Result<ClientStats> {
    conn.query_row(
        "SELECT
             COALESCE(SUM(processed), 0),
             COALESCE(SUM(failed), 0),
             COALESCE(SUM(skipped), 0),
             COALESCE(SUM(total_latency_ms), 0),
             MAX(last_run_at)
         FROM client_stats",
        [],
        |row| {
            Ok(ClientStats {
                client_id: None,
                processed: row.get(0)?,
                failed: row.get(1)?,
                skipped: row.get(2)?,
                total_latency_ms: row.get(3)?,
                last_run_at: row
                    .get::<_, Option<String>>(4)?
                    .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            })
        },
    )
    .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{init_memory_pool, PooledConnection};
    use crate::queries::clients::upsert_client;

    fn setup_test_db() -> (PooledConnection, ClientId) {
        let pool = init_memory_pool().unwrap();
        let conn = pool.get().unwrap();
        let id = ClientId::parse("acme").unwrap();
        upsert_client(
            &conn,
            &id,
            "https://acme.example",
            "bot",
            "secret",
            "en",
            None,
        )
        .unwrap();
        (conn, id)
    }

    #[test]
    fn test_zeroed_stats_for_new_client() {
        let (conn, client) = setup_test_db();
        let stats = get_client_stats(&conn, &client).unwrap();
        assert_eq!(stats.processed, 0);
        assert!(stats.last_run_at.is_none());
        assert!(stats.avg_latency_ms().is_none());
    }

    #[test]
    fn test_record_and_average() {
        let (conn, client) = setup_test_db();

        record_processed(&conn, &client, 1200).unwrap();
        record_processed(&conn, &client, 800).unwrap();
        record_failed(&conn, &client).unwrap();
        record_skipped(&conn, &client, 5).unwrap();

        let stats = get_client_stats(&conn, &client).unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.skipped, 5);
        assert_eq!(stats.avg_latency_ms(), Some(1000));
        assert!(stats.last_run_at.is_some());
    }

    #[test]
    fn test_global_stats_aggregates() {
        let (conn, client_a) = setup_test_db();
        let client_b = ClientId::parse("bravo").unwrap();
        upsert_client(
            &conn,
            &client_b,
            "https://bravo.example",
            "bot",
            "secret",
            "en",
            None,
        )
        .unwrap();

        record_processed(&conn, &client_a, 100).unwrap();
        record_processed(&conn, &client_b, 300).unwrap();
        record_failed(&conn, &client_b).unwrap();

        let global = global_stats(&conn).unwrap();
        assert!(global.client_id.is_none());
        assert_eq!(global.processed, 2);
        assert_eq!(global.failed, 1);
        assert_eq!(global.avg_latency_ms(), Some(200));

        let per_client = list_client_stats(&conn).unwrap();
        assert_eq!(per_client.len(), 2);
    }
}
