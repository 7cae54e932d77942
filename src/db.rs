use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("results.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            exam_no TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            class_name TEXT,
            term TEXT,
            class_rank INTEGER,
            total_students INTEGER,
            term_average REAL,
            fetched_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_scores(
            id TEXT PRIMARY KEY,
            exam_no TEXT NOT NULL,
            name TEXT NOT NULL,
            qa1 REAL,
            qa2 REAL,
            end_of_term REAL,
            qa1_absent INTEGER NOT NULL DEFAULT 0,
            qa2_absent INTEGER NOT NULL DEFAULT 0,
            end_of_term_absent INTEGER NOT NULL DEFAULT 0,
            final_score REAL,
            sort_order INTEGER NOT NULL,
            UNIQUE(exam_no, name),
            FOREIGN KEY(exam_no) REFERENCES students(exam_no)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_scores_exam ON subject_scores(exam_no, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            exam_no TEXT PRIMARY KEY,
            present INTEGER NOT NULL DEFAULT 0,
            absent INTEGER NOT NULL DEFAULT 0,
            late INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(exam_no) REFERENCES students(exam_no)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            prefix TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    // Single-row mirror of the remote grade-configuration service.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_config(
            id INTEGER PRIMARY KEY CHECK(id = 1),
            method TEXT NOT NULL,
            weight_qa1 REAL NOT NULL DEFAULT 0,
            weight_qa2 REAL NOT NULL DEFAULT 0,
            weight_end_of_term REAL NOT NULL DEFAULT 0,
            pass_mark REAL NOT NULL DEFAULT 50,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(match raw {
        Some(s) => Some(serde_json::from_str(&s)?),
        None => None,
    })
}
