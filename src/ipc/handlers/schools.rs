use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

/// Longest-prefix match of an exam number against the cached directory.
/// Best-effort by design: the shell renders its own placeholder text when
/// nothing matches.
pub fn resolve_school(
    conn: &Connection,
    exam_no: &str,
) -> Result<Option<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT prefix, name FROM schools")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut best: Option<(String, String)> = None;
    for (prefix, name) in rows {
        if !exam_no.starts_with(&prefix) {
            continue;
        }
        let longer = best
            .as_ref()
            .map(|(p, _)| prefix.len() > p.len())
            .unwrap_or(true);
        if longer {
            best = Some((prefix, name));
        }
    }
    Ok(best)
}

fn handle_load_directory(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(entries) = req.params.get("schools").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing schools", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(tx) => tx,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute("DELETE FROM schools", []) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    let mut count = 0usize;
    for entry in entries {
        let prefix = entry.get("prefix").and_then(|v| v.as_str()).unwrap_or("");
        let name = entry.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if prefix.is_empty() || name.is_empty() {
            continue;
        }
        let res = tx.execute(
            "INSERT INTO schools(prefix, name) VALUES(?, ?)
             ON CONFLICT(prefix) DO UPDATE SET name = excluded.name",
            (prefix, name),
        );
        if let Err(e) = res {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "schools" })),
            );
        }
        count += 1;
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    let loaded_at = chrono::Utc::now().to_rfc3339();
    let _ = db::settings_set_json(conn, "schools.loadedAt", &json!(loaded_at));

    ok(&req.id, json!({ "count": count, "loadedAt": loaded_at }))
}

fn handle_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(exam_no) = req.params.get("examNo").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing examNo", None);
    };
    let loaded_at = db::settings_get_json(conn, "schools.loadedAt")
        .ok()
        .flatten()
        .unwrap_or(serde_json::Value::Null);
    match resolve_school(conn, exam_no) {
        Ok(Some((prefix, name))) => ok(
            &req.id,
            json!({ "found": true, "prefix": prefix, "name": name, "loadedAt": loaded_at }),
        ),
        Ok(None) => ok(&req.id, json!({ "found": false, "loadedAt": loaded_at })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schools.loadDirectory" => Some(handle_load_directory(state, req)),
        "schools.resolve" => Some(handle_resolve(state, req)),
        _ => None,
    }
}
