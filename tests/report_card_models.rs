use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn weighted_report_card_model_end_to_end() {
    let workspace = temp_dir("resultsd-report-model");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "gradeConfig.set",
        json!({
            "config": {
                "calculationMethod": "weighted_average",
                "weightQa1": 30,
                "weightQa2": 30,
                "weightEndOfTerm": 40,
                "passMark": 50
            }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schools.loadDirectory",
        json!({
            "schools": [
                { "prefix": "KMP", "name": "Kampala Primary School" },
                { "prefix": "KMP2", "name": "Kampala Primary School Annex" }
            ]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "students.load",
        json!({
            "student": {
                "examNo": "KMP2023001",
                "firstName": "Amina",
                "lastName": "Nansubuga",
                "className": "P.7 Blue",
                "term": "Term 2",
                "classRank": 5,
                "totalStudents": 42
            },
            "subjects": [
                { "name": "Mathematics", "qa1": 60, "qa2": 70, "endOfTerm": 80 },
                { "name": "English", "qa1": 90, "qa2": 85, "endOfTerm": 95 },
                { "name": "Science", "qa1": 70, "qa1Absent": true, "qa2": 65, "endOfTerm": 72 }
            ],
            "attendance": { "present": 18, "absent": 2, "late": 1 }
        }),
    );

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "reports.reportCardModel",
        json!({ "examNo": "KMP2023001" }),
    );

    assert_eq!(model.get("available").and_then(|v| v.as_bool()), Some(true));

    let report = model.get("report").expect("report");
    let subjects = report
        .get("subjects")
        .and_then(|v| v.as_array())
        .expect("subjects");
    assert_eq!(subjects.len(), 3);

    // (60*30 + 70*30 + 80*40) / 100
    assert_eq!(subjects[0].get("finalScore"), Some(&json!(71.0)));
    assert_eq!(
        subjects[0].get("grade").and_then(|v| v.as_str()),
        Some("B")
    );
    assert_eq!(
        subjects[0].get("remark").and_then(|v| v.as_str()),
        Some("Passed")
    );

    // (90*30 + 85*30 + 95*40) / 100
    assert_eq!(subjects[1].get("finalScore"), Some(&json!(90.5)));
    assert_eq!(
        subjects[1].get("grade").and_then(|v| v.as_str()),
        Some("A")
    );

    // QA1 absence forces the sentinel under a positive QA1 weight, despite
    // the stray numeric 70 in the slot.
    assert_eq!(subjects[2].get("finalScore"), Some(&json!("AB")));
    assert_eq!(
        subjects[2].get("grade").and_then(|v| v.as_str()),
        Some("AB")
    );
    assert_eq!(
        subjects[2].get("remark").and_then(|v| v.as_str()),
        Some("Absent")
    );

    assert_eq!(report.get("average"), Some(&json!(80.75)));
    assert_eq!(report.get("grandTotal"), Some(&json!(161.5)));
    assert_eq!(
        report.get("overallGrade").and_then(|v| v.as_str()),
        Some("A")
    );
    assert_eq!(
        report.get("overallRemark").and_then(|v| v.as_str()),
        Some("PASSED")
    );
    assert_eq!(
        report.get("strongestSubjects"),
        Some(&json!(["English"]))
    );
    assert_eq!(report.get("needsImprovement"), Some(&json!([])));
    assert_eq!(report.get("passedCount"), Some(&json!(2)));
    assert_eq!(report.get("subjectCount"), Some(&json!(3)));

    let bands = report.get("gradeBands").expect("gradeBands");
    assert_eq!(bands.get("strong"), Some(&json!(2)));
    assert_eq!(bands.get("middle"), Some(&json!(0)));
    assert_eq!(bands.get("belowPass"), Some(&json!(0)));

    let attendance = model.get("attendance").expect("attendance");
    assert_eq!(attendance.get("rate"), Some(&json!(90)));
    assert_eq!(
        attendance.get("comment").and_then(|v| v.as_str()),
        Some("good")
    );
    assert_eq!(attendance.get("needsAttention"), Some(&json!(false)));

    // Longest directory prefix wins.
    let school = model.get("school").expect("school");
    assert_eq!(school.get("found"), Some(&json!(true)));
    assert_eq!(
        school.get("name").and_then(|v| v.as_str()),
        Some("Kampala Primary School Annex")
    );

    let student = model.get("student").expect("student");
    assert_eq!(
        student.get("displayName").and_then(|v| v.as_str()),
        Some("Nansubuga, Amina")
    );
    assert_eq!(student.get("classRank"), Some(&json!(5)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn backend_term_average_overrides_recomputation() {
    let workspace = temp_dir("resultsd-term-average");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.load",
        json!({
            "student": {
                "examNo": "KMP2023002",
                "firstName": "Joel",
                "lastName": "Okello",
                "assessmentStats": { "overall": { "termAverage": 62.5 } }
            },
            "subjects": [
                { "name": "Mathematics", "qa1": 80, "qa2": 80, "endOfTerm": 80 }
            ]
        }),
    );

    let model = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "reports.reportCardModel",
        json!({ "examNo": "KMP2023002" }),
    );
    let report = model.get("report").expect("report");
    assert_eq!(report.get("average"), Some(&json!(62.5)));
    assert_eq!(
        report.get("overallGrade").and_then(|v| v.as_str()),
        Some("C")
    );
    // Recomputed values still drive the per-subject table and grand total.
    assert_eq!(report.get("grandTotal"), Some(&json!(80.0)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
