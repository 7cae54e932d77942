use crate::grading::{AttendanceCounts, SubjectScores};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub exam_no: String,
    pub first_name: String,
    pub last_name: String,
    pub class_name: Option<String>,
    pub term: Option<String>,
    pub class_rank: Option<i64>,
    pub total_students: Option<i64>,
    pub term_average: Option<f64>,
    pub fetched_at: Option<String>,
}

impl StudentRow {
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

pub fn get_student(
    conn: &Connection,
    exam_no: &str,
) -> Result<Option<StudentRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT exam_no, first_name, last_name, class_name, term, class_rank,
                total_students, term_average, fetched_at
         FROM students
         WHERE exam_no = ?",
        [exam_no],
        |r| {
            Ok(StudentRow {
                exam_no: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
                class_name: r.get(3)?,
                term: r.get(4)?,
                class_rank: r.get(5)?,
                total_students: r.get(6)?,
                term_average: r.get(7)?,
                fetched_at: r.get(8)?,
            })
        },
    )
    .optional()
}

pub fn list_subjects(
    conn: &Connection,
    exam_no: &str,
) -> Result<Vec<SubjectScores>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT name, qa1, qa2, end_of_term, qa1_absent, qa2_absent, end_of_term_absent, final_score
         FROM subject_scores
         WHERE exam_no = ?
         ORDER BY sort_order",
    )?;
    stmt.query_map([exam_no], |r| {
        Ok(SubjectScores {
            name: r.get(0)?,
            qa1: r.get(1)?,
            qa2: r.get(2)?,
            end_of_term: r.get(3)?,
            qa1_absent: r.get::<_, i64>(4)? != 0,
            qa2_absent: r.get::<_, i64>(5)? != 0,
            end_of_term_absent: r.get::<_, i64>(6)? != 0,
            final_score: r.get(7)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
}

pub fn get_attendance(
    conn: &Connection,
    exam_no: &str,
) -> Result<AttendanceCounts, rusqlite::Error> {
    let row: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT present, absent, late FROM attendance WHERE exam_no = ?",
            [exam_no],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    Ok(match row {
        Some((present, absent, late)) => AttendanceCounts {
            present,
            absent,
            late,
        },
        None => AttendanceCounts::default(),
    })
}

fn slot_in_range(v: Option<f64>) -> bool {
    v.map(|n| (0.0..=100.0).contains(&n)).unwrap_or(true)
}

fn validate_subjects(subjects: &[SubjectScores]) -> Result<(), HandlerErr> {
    for s in subjects {
        if s.name.trim().is_empty() {
            return Err(HandlerErr {
                code: "bad_params",
                message: "subject name must not be empty".to_string(),
                details: None,
            });
        }
        let in_range = slot_in_range(s.qa1)
            && slot_in_range(s.qa2)
            && slot_in_range(s.end_of_term)
            && slot_in_range(s.final_score);
        if !in_range {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("scores for {} must be within 0..=100", s.name),
                details: Some(json!({ "subject": s.name })),
            });
        }
    }
    Ok(())
}

fn student_json(row: &StudentRow) -> serde_json::Value {
    json!({
        "examNo": row.exam_no,
        "firstName": row.first_name,
        "lastName": row.last_name,
        "displayName": row.display_name(),
        "className": row.class_name,
        "term": row.term,
        "classRank": row.class_rank,
        "totalStudents": row.total_students,
        "termAverage": row.term_average,
        "fetchedAt": row.fetched_at,
    })
}

fn subject_json(s: &SubjectScores) -> serde_json::Value {
    json!({
        "name": s.name,
        "qa1": s.qa1,
        "qa2": s.qa2,
        "endOfTerm": s.end_of_term,
        "qa1Absent": s.qa1_absent,
        "qa2Absent": s.qa2_absent,
        "endOfTermAbsent": s.end_of_term_absent,
        "finalScore": s.final_score,
    })
}

fn students_load(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let Some(student) = params.get("student") else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing student".to_string(),
            details: None,
        });
    };
    let exam_no = get_required_str(student, "examNo")?;
    let first_name = get_required_str(student, "firstName")?;
    let last_name = get_required_str(student, "lastName")?;
    let class_name = student.get("className").and_then(|v| v.as_str());
    let term = student.get("term").and_then(|v| v.as_str());
    let class_rank = student.get("classRank").and_then(|v| v.as_i64());
    let total_students = student.get("totalStudents").and_then(|v| v.as_i64());
    // The backend's population-based term average, when it sends one.
    let term_average = student
        .get("assessmentStats")
        .and_then(|v| v.get("overall"))
        .and_then(|v| v.get("termAverage"))
        .or_else(|| student.get("termAverage"))
        .and_then(|v| v.as_f64());

    let subjects: Vec<SubjectScores> = match params.get("subjects") {
        None => Vec::new(),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("invalid subjects: {}", e),
            details: None,
        })?,
    };
    validate_subjects(&subjects)?;

    let attendance: AttendanceCounts = match params.get("attendance") {
        None => AttendanceCounts::default(),
        Some(raw) => serde_json::from_value(raw.clone()).map_err(|e| HandlerErr {
            code: "bad_params",
            message: format!("invalid attendance: {}", e),
            details: None,
        })?,
    };

    let fetched_at = chrono::Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    tx.execute(
        "INSERT INTO students(exam_no, first_name, last_name, class_name, term,
                              class_rank, total_students, term_average, fetched_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(exam_no) DO UPDATE SET
           first_name = excluded.first_name,
           last_name = excluded.last_name,
           class_name = excluded.class_name,
           term = excluded.term,
           class_rank = excluded.class_rank,
           total_students = excluded.total_students,
           term_average = excluded.term_average,
           fetched_at = excluded.fetched_at",
        (
            &exam_no,
            &first_name,
            &last_name,
            class_name,
            term,
            class_rank,
            total_students,
            term_average,
            &fetched_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    // Each load replaces the cached subject rows wholesale; the fetch is the
    // source of truth.
    tx.execute("DELETE FROM subject_scores WHERE exam_no = ?", [&exam_no])
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subject_scores" })),
        })?;
    for (idx, s) in subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO subject_scores(id, exam_no, name, qa1, qa2, end_of_term,
                                        qa1_absent, qa2_absent, end_of_term_absent,
                                        final_score, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &exam_no,
                &s.name,
                s.qa1,
                s.qa2,
                s.end_of_term,
                s.qa1_absent as i64,
                s.qa2_absent as i64,
                s.end_of_term_absent as i64,
                s.final_score,
                idx as i64,
            ),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "subject_scores" })),
        })?;
    }

    tx.execute(
        "INSERT INTO attendance(exam_no, present, absent, late)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(exam_no) DO UPDATE SET
           present = excluded.present,
           absent = excluded.absent,
           late = excluded.late",
        (&exam_no, attendance.present, attendance.absent, attendance.late),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "examNo": exam_no,
        "subjectCount": subjects.len(),
        "fetchedAt": fetched_at,
    }))
}

fn students_lookup(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_no = get_required_str(params, "examNo")?;
    let Some(row) = get_student(conn, &exam_no).map_err(db_err)? else {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "examNo": exam_no })),
        });
    };
    let subjects = list_subjects(conn, &exam_no).map_err(db_err)?;
    let attendance = get_attendance(conn, &exam_no).map_err(db_err)?;

    Ok(json!({
        "student": student_json(&row),
        "subjects": subjects.iter().map(subject_json).collect::<Vec<_>>(),
        "attendance": attendance,
    }))
}

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT exam_no, last_name, first_name, class_name, term, fetched_at
             FROM students
             ORDER BY last_name, first_name",
        )
        .map_err(db_err)?;
    let students: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            let exam_no: String = r.get(0)?;
            let last: String = r.get(1)?;
            let first: String = r.get(2)?;
            let class_name: Option<String> = r.get(3)?;
            let term: Option<String> = r.get(4)?;
            let fetched_at: Option<String> = r.get(5)?;
            Ok(json!({
                "examNo": exam_no,
                "displayName": format!("{}, {}", last, first),
                "className": class_name,
                "term": term,
                "fetchedAt": fetched_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "students": students }))
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_no = get_required_str(params, "examNo")?;
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for sql in [
        "DELETE FROM subject_scores WHERE exam_no = ?",
        "DELETE FROM attendance WHERE exam_no = ?",
        "DELETE FROM students WHERE exam_no = ?",
    ] {
        tx.execute(sql, [&exam_no]).map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: None,
        })?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "examNo": exam_no }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.load" => Some(with_conn(state, req, students_load)),
        "students.lookup" => Some(with_conn(state, req, students_lookup)),
        "students.list" => Some(with_conn(state, req, |c, _| students_list(c))),
        "students.delete" => Some(with_conn(state, req, students_delete)),
        _ => None,
    }
}
