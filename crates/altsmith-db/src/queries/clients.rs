//! Client registration query operations.

use altsmith_common::{ClientId, Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use super::column_error;
use crate::models::Client;

const CLIENT_COLUMNS: &str = "id, base_url, username, app_password, enabled, auth_ok,
                language, provider_order, created_at, updated_at";

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: ClientId::parse(row.get::<_, String>(0)?).map_err(|e| column_error(0, e))?,
        base_url: row.get(1)?,
        username: row.get(2)?,
        app_password: row.get(3)?,
        enabled: row.get(4)?,
        auth_ok: row.get(5)?,
        language: row.get(6)?,
        provider_order: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        created_at: parse_ts(&row.get::<_, String>(8)?),
        updated_at: parse_ts(&row.get::<_, String>(9)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Register a client, or update its registration if the ID already exists.
///
/// Re-registration resets `enabled` and `auth_ok`, so an operator can recover
/// a client whose credential was revoked by registering a fresh password.
#[allow(clippy::too_many_arguments)]
pub fn upsert_client(
    conn: &Connection,
    id: &ClientId,
    base_url: &str,
    username: &str,
    app_password: &str,
    language: &str,
    provider_order: Option<&[String]>,
) -> Result<Client> {
    let now = Utc::now();
    let order_json = provider_order
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::database(e.to_string()))?;

    conn.execute(
        "INSERT INTO clients (id, base_url, username, app_password, enabled, auth_ok,
                              language, provider_order, created_at, updated_at)
         VALUES (?, ?, ?, ?, 1, 1, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
             base_url = excluded.base_url,
             username = excluded.username,
             app_password = excluded.app_password,
             enabled = 1,
             auth_ok = 1,
             language = excluded.language,
             provider_order = excluded.provider_order,
             updated_at = excluded.updated_at",
        params![
            id.as_str(),
            base_url,
            username,
            app_password,
            language,
            order_json,
            now.to_rfc3339(),
            now.to_rfc3339(),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    get_client(conn, id)
}

/// Get a client by ID.
pub fn get_client(conn: &Connection, id: &ClientId) -> Result<Client> {
    conn.query_row(
        &format!("SELECT {} FROM clients WHERE id = ?", CLIENT_COLUMNS),
        [id.as_str()],
        client_from_row,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => Error::not_found("client"),
        _ => Error::database(e.to_string()),
    })
}

/// List every registered client, enabled or not.
pub fn list_clients(conn: &Connection) -> Result<Vec<Client>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM clients ORDER BY id ASC",
            CLIENT_COLUMNS
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let clients = stmt
        .query_map([], client_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(clients)
}

/// List clients eligible for processing: enabled with a working credential.
pub fn list_processable_clients(conn: &Connection) -> Result<Vec<Client>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM clients WHERE enabled = 1 AND auth_ok = 1 ORDER BY id ASC",
            CLIENT_COLUMNS
        ))
        .map_err(|e| Error::database(e.to_string()))?;

    let clients = stmt
        .query_map([], client_from_row)
        .map_err(|e| Error::database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::database(e.to_string()))?;

    Ok(clients)
}

/// Enable or disable a client.
pub fn set_enabled(conn: &Connection, id: &ClientId, enabled: bool) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE clients SET enabled = ?, updated_at = ? WHERE id = ?",
            params![enabled, Utc::now().to_rfc3339(), id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("client"));
    }

    Ok(())
}

/// Record the outcome of the last credential check against the site.
pub fn set_auth_ok(conn: &Connection, id: &ClientId, auth_ok: bool) -> Result<()> {
    let affected = conn
        .execute(
            "UPDATE clients SET auth_ok = ?, updated_at = ? WHERE id = ?",
            params![auth_ok, Utc::now().to_rfc3339(), id.as_str()],
        )
        .map_err(|e| Error::database(e.to_string()))?;

    if affected == 0 {
        return Err(Error::not_found("client"));
    }

    Ok(())
}
