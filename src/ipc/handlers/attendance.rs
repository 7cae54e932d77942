use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

use super::students;

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(exam_no) = req.params.get("examNo").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing examNo", None);
    };

    let exists = match students::get_student(conn, exam_no) {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(
            &req.id,
            "not_found",
            "student not found",
            Some(json!({ "examNo": exam_no })),
        );
    }

    let counts = match students::get_attendance(conn, exam_no) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({ "summary": grading::attendance_summary(&counts) }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
