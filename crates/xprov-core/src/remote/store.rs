// Embedded-store editing for the shell-path backend.
//
// The panel rehydrates the live config file from this SQLite database on
// every restart, so a file-only write is discarded at the next restart.
// The database is pulled down over SFTP, mutated locally, and pushed
// back -- the panel host cannot be assumed to have a sqlite3 binary.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::Protocol;
use crate::remote::ssh::SshSession;

/// Known store locations across panel install layouts.
pub(crate) const STORE_PATHS: &[&str] = &[
    "/usr/local/x-ui/bin/x-ui.db",
    "/etc/x-ui/x-ui.db",
    "/usr/local/x-ui/x-ui.db",
];

/// Outcome of a store-level mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreOutcome {
    /// The row was mutated and uploaded.
    Updated,
    /// The store already reflected the desired state.
    AlreadyConsistent,
    /// No inbound row matched -- the store was left untouched.
    RowMissing,
}

pub(crate) fn locate_store_path(ssh: &SshSession) -> Result<String, EngineError> {
    for path in STORE_PATHS {
        if ssh.file_exists(path)? {
            info!(path, "found panel store");
            return Ok((*path).to_owned());
        }
    }
    Err(EngineError::discovery(
        "panel store path",
        format!("none of {} exist", STORE_PATHS.join(", ")),
    ))
}

// ── Row mutation (pure over the settings JSON text) ─────────────────

/// Append `client` to the row's settings text. `Ok(None)` means the id
/// is already present and nothing needs to change.
pub(crate) fn add_client_to_settings(
    settings_json: &str,
    client: &Value,
) -> Result<Option<String>, serde_json::Error> {
    let mut settings: Value = serde_json::from_str(settings_json)?;
    if !settings.get("clients").is_some_and(Value::is_array) {
        settings["clients"] = json!([]);
    }
    let clients = settings["clients"].as_array_mut().expect("ensured above");

    let id = client.get("id").and_then(Value::as_str);
    if clients
        .iter()
        .any(|c| c.get("id").and_then(Value::as_str) == id)
    {
        return Ok(None);
    }
    clients.push(client.clone());
    Ok(Some(settings.to_string()))
}

/// Remove the client with `id` from the row's settings text. `Ok(None)`
/// means the id was not present.
pub(crate) fn remove_client_from_settings(
    settings_json: &str,
    id: &Uuid,
) -> Result<Option<String>, serde_json::Error> {
    let mut settings: Value = serde_json::from_str(settings_json)?;
    let Some(clients) = settings.get_mut("clients").and_then(Value::as_array_mut) else {
        return Ok(None);
    };
    let id = id.to_string();
    let before = clients.len();
    clients.retain(|c| c.get("id").and_then(Value::as_str) != Some(id.as_str()));
    if clients.len() == before {
        return Ok(None);
    }
    Ok(Some(settings.to_string()))
}

// ── Local database mutation ─────────────────────────────────────────

/// Add `client` to the (port, protocol) inbound row of a local copy of
/// the store.
pub(crate) fn add_client_to_db(
    db_path: &Path,
    port: u16,
    protocol: Protocol,
    client: &Value,
) -> Result<StoreOutcome, EngineError> {
    let conn = open(db_path)?;
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, settings FROM inbounds WHERE port = ?1 AND protocol = ?2",
            params![port, protocol.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(store_err)?;

    let Some((row_id, settings)) = row else {
        warn!(port, %protocol, "no matching inbound row in the panel store");
        return Ok(StoreOutcome::RowMissing);
    };

    match add_client_to_settings(&settings, client)
        .map_err(|e| EngineError::Internal(format!("store settings decode: {e}")))?
    {
        Some(updated) => {
            conn.execute(
                "UPDATE inbounds SET settings = ?1 WHERE id = ?2",
                params![updated, row_id],
            )
            .map_err(store_err)?;
            debug!(row_id, "client added to store row");
            Ok(StoreOutcome::Updated)
        }
        None => {
            debug!(row_id, "client already present in store row");
            Ok(StoreOutcome::AlreadyConsistent)
        }
    }
}

/// Remove the client with `id` from every inbound row of a local copy
/// of the store.
pub(crate) fn remove_client_from_db(db_path: &Path, id: &Uuid) -> Result<StoreOutcome, EngineError> {
    let conn = open(db_path)?;
    let mut stmt = conn
        .prepare("SELECT id, settings FROM inbounds")
        .map_err(store_err)?;
    let rows: Vec<(i64, String)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(store_err)?
        .collect::<Result<_, _>>()
        .map_err(store_err)?;
    drop(stmt);

    let mut removed = false;
    for (row_id, settings) in rows {
        let updated = remove_client_from_settings(&settings, id)
            .map_err(|e| EngineError::Internal(format!("store settings decode: {e}")))?;
        if let Some(updated) = updated {
            conn.execute(
                "UPDATE inbounds SET settings = ?1 WHERE id = ?2",
                params![updated, row_id],
            )
            .map_err(store_err)?;
            debug!(row_id, "client removed from store row");
            removed = true;
        }
    }

    Ok(if removed {
        StoreOutcome::Updated
    } else {
        StoreOutcome::AlreadyConsistent
    })
}

fn open(path: &Path) -> Result<Connection, EngineError> {
    Connection::open(path).map_err(store_err)
}

fn store_err(e: rusqlite::Error) -> EngineError {
    EngineError::Internal(format!("panel store: {e}"))
}

// ── Remote round trips ──────────────────────────────────────────────

/// Download the store, add the client, upload it back.
pub(crate) fn apply_add(
    ssh: &SshSession,
    port: u16,
    protocol: Protocol,
    client: &Value,
) -> Result<StoreOutcome, EngineError> {
    let remote = locate_store_path(ssh)?;
    let scratch = tempfile::NamedTempFile::new()
        .map_err(|e| EngineError::Internal(format!("scratch file: {e}")))?;

    ssh.download(&remote, scratch.path())?;
    let outcome = add_client_to_db(scratch.path(), port, protocol, client)?;
    if outcome == StoreOutcome::Updated {
        ssh.upload(scratch.path(), &remote)?;
        info!(path = %remote, "panel store updated");
    }
    Ok(outcome)
}

/// Download the store, remove the client from all inbound rows, upload
/// it back.
pub(crate) fn apply_remove(ssh: &SshSession, id: &Uuid) -> Result<StoreOutcome, EngineError> {
    let remote = locate_store_path(ssh)?;
    let scratch = tempfile::NamedTempFile::new()
        .map_err(|e| EngineError::Internal(format!("scratch file: {e}")))?;

    ssh.download(&remote, scratch.path())?;
    let outcome = remove_client_from_db(scratch.path(), id)?;
    if outcome == StoreOutcome::Updated {
        ssh.upload(scratch.path(), &remote)?;
        info!(path = %remote, "panel store updated");
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn seeded_db() -> (tempfile::NamedTempFile, Connection) {
        let file = tempfile::NamedTempFile::new().expect("temp file");
        let conn = Connection::open(file.path()).expect("open db");
        conn.execute_batch(
            "CREATE TABLE inbounds (
                 id INTEGER PRIMARY KEY,
                 port INTEGER NOT NULL,
                 protocol TEXT NOT NULL,
                 settings TEXT NOT NULL
             );",
        )
        .expect("schema");
        conn.execute(
            "INSERT INTO inbounds (id, port, protocol, settings) VALUES (1, 443, 'vless', ?1)",
            params![json!({ "clients": [
                { "id": "11111111-1111-1111-1111-111111111111", "email": "user_11111111" }
            ]})
            .to_string()],
        )
        .expect("seed row");
        (file, conn)
    }

    fn row_settings(conn: &Connection) -> Value {
        let text: String = conn
            .query_row("SELECT settings FROM inbounds WHERE id = 1", [], |row| {
                row.get(0)
            })
            .expect("row exists");
        serde_json::from_str(&text).expect("valid JSON")
    }

    #[test]
    fn add_inserts_into_matching_row() {
        let (file, conn) = seeded_db();
        let client = json!({ "id": "22222222-2222-2222-2222-222222222222", "email": "user_22222222" });

        let outcome =
            add_client_to_db(file.path(), 443, Protocol::Vless, &client).expect("add succeeds");
        assert_eq!(outcome, StoreOutcome::Updated);
        assert_eq!(
            row_settings(&conn)["clients"].as_array().expect("clients").len(),
            2
        );
    }

    #[test]
    fn add_is_idempotent() {
        let (file, conn) = seeded_db();
        let client = json!({ "id": "11111111-1111-1111-1111-111111111111", "email": "user_11111111" });

        let outcome =
            add_client_to_db(file.path(), 443, Protocol::Vless, &client).expect("add succeeds");
        assert_eq!(outcome, StoreOutcome::AlreadyConsistent);
        assert_eq!(
            row_settings(&conn)["clients"].as_array().expect("clients").len(),
            1
        );
    }

    #[test]
    fn add_reports_missing_row_without_touching_the_store() {
        let (file, conn) = seeded_db();
        let client = json!({ "id": "22222222-2222-2222-2222-222222222222" });

        let outcome =
            add_client_to_db(file.path(), 8443, Protocol::Vmess, &client).expect("add runs");
        assert_eq!(outcome, StoreOutcome::RowMissing);
        assert_eq!(
            row_settings(&conn)["clients"].as_array().expect("clients").len(),
            1
        );
    }

    #[test]
    fn remove_scans_all_rows() {
        let (file, conn) = seeded_db();
        conn.execute(
            "INSERT INTO inbounds (id, port, protocol, settings) VALUES (2, 8080, 'vmess', ?1)",
            params![json!({ "clients": [
                { "id": "11111111-1111-1111-1111-111111111111", "email": "dup" }
            ]})
            .to_string()],
        )
        .expect("second row");

        let id: Uuid = "11111111-1111-1111-1111-111111111111".parse().expect("uuid");
        let outcome = remove_client_from_db(file.path(), &id).expect("remove succeeds");
        assert_eq!(outcome, StoreOutcome::Updated);

        assert!(row_settings(&conn)["clients"].as_array().expect("clients").is_empty());
        let second: String = conn
            .query_row("SELECT settings FROM inbounds WHERE id = 2", [], |row| {
                row.get(0)
            })
            .expect("row exists");
        assert!(!second.contains("11111111"));
    }

    #[test]
    fn remove_of_absent_id_is_consistent() {
        let (file, _conn) = seeded_db();
        let outcome =
            remove_client_from_db(file.path(), &Uuid::nil()).expect("remove runs");
        assert_eq!(outcome, StoreOutcome::AlreadyConsistent);
    }

    #[test]
    fn settings_text_round_trips_other_fields() {
        let settings = r#"{"clients":[],"decryption":"none","fallbacks":[]}"#;
        let client = json!({ "id": "33333333-3333-3333-3333-333333333333" });
        let updated = add_client_to_settings(settings, &client)
            .expect("valid JSON")
            .expect("client added");
        let parsed: Value = serde_json::from_str(&updated).expect("valid JSON");
        assert_eq!(parsed["decryption"], json!("none"));
        assert!(parsed["fallbacks"].as_array().expect("fallbacks").is_empty());
    }
}
