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
fn directory_prefix_resolution_prefers_the_longest_match() {
    let workspace = temp_dir("resultsd-schools");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let loaded = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schools.loadDirectory",
        json!({
            "schools": [
                { "prefix": "MBR", "name": "Mbarara Junior School" },
                { "prefix": "MBR1", "name": "Mbarara Junior School Campus One" },
                { "prefix": "GUL", "name": "Gulu Hill Academy" },
                { "prefix": "", "name": "Dropped" }
            ]
        }),
    );
    assert_eq!(loaded.get("count"), Some(&json!(3)));

    let hit = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "schools.resolve",
        json!({ "examNo": "MBR1500321" }),
    );
    assert_eq!(hit.get("found"), Some(&json!(true)));
    assert_eq!(hit.get("prefix").and_then(|v| v.as_str()), Some("MBR1"));
    assert_eq!(
        hit.get("name").and_then(|v| v.as_str()),
        Some("Mbarara Junior School Campus One")
    );

    let shorter = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schools.resolve",
        json!({ "examNo": "MBR9000001" }),
    );
    assert_eq!(
        shorter.get("name").and_then(|v| v.as_str()),
        Some("Mbarara Junior School")
    );

    let miss = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "schools.resolve",
        json!({ "examNo": "XYZ0000001" }),
    );
    assert_eq!(miss.get("found"), Some(&json!(false)));
    assert!(miss.get("name").is_none());

    // Reloading replaces the directory wholesale.
    let reloaded = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "schools.loadDirectory",
        json!({ "schools": [ { "prefix": "XYZ", "name": "New Town College" } ] }),
    );
    assert_eq!(reloaded.get("count"), Some(&json!(1)));
    let old = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "schools.resolve",
        json!({ "examNo": "MBR1500321" }),
    );
    assert_eq!(old.get("found"), Some(&json!(false)));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
