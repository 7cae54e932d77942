use crate::grading;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::io::Write;

use super::{grade_config, schools, students};

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

struct ReportInputs {
    student: students::StudentRow,
    subjects: Vec<grading::SubjectScores>,
    attendance: grading::AttendanceCounts,
    config: grading::GradeConfig,
}

fn load_report_inputs(
    conn: &Connection,
    req: &Request,
    exam_no: &str,
) -> Result<ReportInputs, serde_json::Value> {
    let student = students::get_student(conn, exam_no)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?
        .ok_or_else(|| {
            err(
                &req.id,
                "not_found",
                "student not found",
                Some(json!({ "examNo": exam_no })),
            )
        })?;
    let subjects = students::list_subjects(conn, exam_no)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let attendance = students::get_attendance(conn, exam_no)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    let config = grade_config::load_config(conn)
        .map_err(|e| err(&req.id, "db_query_failed", e.to_string(), None))?;
    Ok(ReportInputs {
        student,
        subjects,
        attendance,
        config,
    })
}

fn unavailable_reason(config: &grading::GradeConfig) -> &'static str {
    if config.method == grading::CalcMethod::EndOfTermOnly {
        "no end-of-term assessments entered"
    } else {
        "no assessments entered"
    }
}

fn handle_report_card_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_no = match required_str(req, "examNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let inputs = match load_report_inputs(conn, req, &exam_no) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // The shell branches on this before rendering; an empty record is a
    // state, not an error.
    if !grading::report_available(&inputs.subjects, &inputs.config) {
        return ok(
            &req.id,
            json!({
                "available": false,
                "reason": unavailable_reason(&inputs.config),
            }),
        );
    }

    let summary = grading::compute_report_card(
        &inputs.subjects,
        &inputs.config,
        inputs.student.term_average,
    );
    let attendance = grading::attendance_summary(&inputs.attendance);

    let school = match schools::resolve_school(conn, &exam_no) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let school_json = match school {
        Some((prefix, name)) => json!({ "found": true, "prefix": prefix, "name": name }),
        None => json!({ "found": false }),
    };

    let strongest_label = if summary.strongest_subjects.is_empty() {
        "No valid scores".to_string()
    } else {
        summary.strongest_subjects.join(", ")
    };

    ok(
        &req.id,
        json!({
            "available": true,
            "student": {
                "examNo": inputs.student.exam_no,
                "displayName": inputs.student.display_name(),
                "className": inputs.student.class_name,
                "term": inputs.student.term,
                "classRank": inputs.student.class_rank,
                "totalStudents": inputs.student.total_students,
            },
            "school": school_json,
            "config": inputs.config,
            "report": summary,
            "strongestLabel": strongest_label,
            "attendance": attendance,
            "generatedAt": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

fn handle_export_rows(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_no = match required_str(req, "examNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let inputs = match load_report_inputs(conn, req, &exam_no) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !grading::report_available(&inputs.subjects, &inputs.config) {
        return ok(
            &req.id,
            json!({
                "available": false,
                "reason": unavailable_reason(&inputs.config),
            }),
        );
    }

    let summary = grading::compute_report_card(
        &inputs.subjects,
        &inputs.config,
        inputs.student.term_average,
    );
    let rows = grading::export_rows(&summary);
    ok(
        &req.id,
        json!({
            "available": true,
            "rows": rows,
            "generatedAt": chrono::Utc::now().to_rfc3339(),
        }),
    )
}

fn write_rows_csv(path: &std::path::Path, rows: &[grading::ExportRow]) -> anyhow::Result<()> {
    use anyhow::Context;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let mut out = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.to_string_lossy()))?;
    writeln!(out, "Subject,Total Marks,Marks Scored,Grade,Remark")
        .context("failed to write csv header")?;
    for row in rows {
        writeln!(
            out,
            "{},{:.0},{},{},{}",
            row.subject,
            row.total_marks,
            row.marks_scored,
            row.grade.as_str(),
            row.remark,
        )
        .context("failed to write csv row")?;
    }
    Ok(())
}

fn handle_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exam_no = match required_str(req, "examNo") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let inputs = match load_report_inputs(conn, req, &exam_no) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !grading::report_available(&inputs.subjects, &inputs.config) {
        return ok(
            &req.id,
            json!({
                "available": false,
                "reason": unavailable_reason(&inputs.config),
            }),
        );
    }

    let summary = grading::compute_report_card(
        &inputs.subjects,
        &inputs.config,
        inputs.student.term_average,
    );
    let rows = grading::export_rows(&summary);
    let path = std::path::PathBuf::from(&out_path);
    match write_rows_csv(&path, &rows) {
        Ok(()) => ok(
            &req.id,
            json!({
                "available": true,
                "outPath": out_path,
                "rowCount": rows.len(),
                "generatedAt": chrono::Utc::now().to_rfc3339(),
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.reportCardModel" => Some(handle_report_card_model(state, req)),
        "reports.exportRows" => Some(handle_export_rows(state, req)),
        "reports.exportCsv" => Some(handle_export_csv(state, req)),
        _ => None,
    }
}
