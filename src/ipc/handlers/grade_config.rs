use crate::grading::{CalcMethod, GradeConfig};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Reads the stored configuration, falling back to defaults when the row is
/// missing or carries an unknown method. The engine never sees an error here.
pub fn load_config(conn: &Connection) -> Result<GradeConfig, rusqlite::Error> {
    let row: Option<(String, f64, f64, f64, f64)> = conn
        .query_row(
            "SELECT method, weight_qa1, weight_qa2, weight_end_of_term, pass_mark
             FROM grade_config
             WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;

    let Some((method, weight_qa1, weight_qa2, weight_end_of_term, pass_mark)) = row else {
        return Ok(GradeConfig::default());
    };
    let Some(method) = CalcMethod::parse(&method) else {
        return Ok(GradeConfig::default());
    };
    Ok(GradeConfig {
        method,
        weight_qa1,
        weight_qa2,
        weight_end_of_term,
        pass_mark,
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let stored: Result<Option<i64>, rusqlite::Error> = conn
        .query_row("SELECT 1 FROM grade_config WHERE id = 1", [], |r| r.get(0))
        .optional();
    let stored = match stored {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match load_config(conn) {
        Ok(config) => ok(&req.id, json!({ "config": config, "stored": stored })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = req.params.get("config") else {
        return err(&req.id, "bad_params", "missing params.config", None);
    };

    // Reject an unknown method on an explicit write; silent fallback is for
    // reads, not for storing garbage.
    if let Some(m) = raw
        .get("calculationMethod")
        .or_else(|| raw.get("calculation_method"))
        .and_then(|v| v.as_str())
    {
        if CalcMethod::parse(m).is_none() {
            return err(
                &req.id,
                "bad_params",
                "calculationMethod must be one of: average_all, end_of_term_only, weighted_average",
                Some(json!({ "calculationMethod": m })),
            );
        }
    }
    let config = GradeConfig::from_json(Some(raw));
    let updated_at = chrono::Utc::now().to_rfc3339();

    let res = conn.execute(
        "INSERT INTO grade_config(id, method, weight_qa1, weight_qa2, weight_end_of_term, pass_mark, updated_at)
         VALUES(1, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           method = excluded.method,
           weight_qa1 = excluded.weight_qa1,
           weight_qa2 = excluded.weight_qa2,
           weight_end_of_term = excluded.weight_end_of_term,
           pass_mark = excluded.pass_mark,
           updated_at = excluded.updated_at",
        (
            config.method.as_key(),
            config.weight_qa1,
            config.weight_qa2,
            config.weight_end_of_term,
            config.pass_mark,
            &updated_at,
        ),
    );
    match res {
        Ok(_) => ok(&req.id, json!({ "config": config, "updatedAt": updated_at })),
        Err(e) => err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grade_config" })),
        ),
    }
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match conn.execute("DELETE FROM grade_config WHERE id = 1", []) {
        Ok(_) => ok(&req.id, json!({ "config": GradeConfig::default() })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "gradeConfig.get" => Some(handle_get(state, req)),
        "gradeConfig.set" => Some(handle_set(state, req)),
        "gradeConfig.clear" => Some(handle_clear(state, req)),
        _ => None,
    }
}
