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
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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
    value
}

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn writes_require_a_signed_in_session() {
    let workspace = temp_dir("attendanced-auth-gating");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "h", "health", json!({}));
    assert_eq!(health.get("ok").and_then(|v| v.as_bool()), Some(true));

    let selected = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected.get("ok").and_then(|v| v.as_bool()), Some(true));

    // Every mutating family rejects without a session.
    let create = request(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "Nope" }),
    );
    assert_eq!(error_code(&create), "not_authenticated");

    let add = request(
        &mut stdin,
        &mut reader,
        "s",
        "students.add",
        json!({ "classId": "x", "studentId": "1", "name": "N" }),
    );
    assert_eq!(error_code(&add), "not_authenticated");

    let start = request(
        &mut stdin,
        &mut reader,
        "sc",
        "scan.start",
        json!({ "classId": "x", "scanTypeId": "y" }),
    );
    assert_eq!(error_code(&start), "not_authenticated");

    let record = request(
        &mut stdin,
        &mut reader,
        "r",
        "attendance.record",
        json!({ "classId": "x", "scannedValue": "1", "type": "IN" }),
    );
    assert_eq!(error_code(&record), "not_authenticated");

    // Reads degrade to empty rather than failing.
    let listed = request(&mut stdin, &mut reader, "l", "classes.list", json!({}));
    assert_eq!(listed.get("ok").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(
        listed
            .get("result")
            .and_then(|r| r.get("classes"))
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let session = request(&mut stdin, &mut reader, "se", "auth.session", json!({}));
    assert!(session
        .get("result")
        .and_then(|r| r.get("session"))
        .map(|s| s.is_null())
        .unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn sign_out_ends_the_session_and_stops_scanning() {
    let workspace = temp_dir("attendanced-auth-signout");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "a",
        "auth.signIn",
        json!({ "email": "u@example.com" }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "C" }),
    );
    let class_id = created
        .get("result")
        .and_then(|r| r.get("classId"))
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let scan_type = request(
        &mut stdin,
        &mut reader,
        "t",
        "scanTypes.add",
        json!({ "classId": class_id, "name": "IN" }),
    );
    let type_id = scan_type
        .get("result")
        .and_then(|r| r.get("typeId"))
        .and_then(|v| v.as_str())
        .expect("typeId")
        .to_string();

    let _ = request(
        &mut stdin,
        &mut reader,
        "st",
        "scan.start",
        json!({ "classId": class_id, "scanTypeId": type_id }),
    );
    let _ = request(&mut stdin, &mut reader, "so", "auth.signOut", json!({}));

    let status = request(&mut stdin, &mut reader, "ss", "scan.status", json!({}));
    assert_eq!(
        status
            .get("result")
            .and_then(|r| r.get("status"))
            .and_then(|v| v.as_str()),
        Some("idle")
    );

    let session = request(&mut stdin, &mut reader, "se", "auth.session", json!({}));
    assert!(session
        .get("result")
        .and_then(|r| r.get("session"))
        .map(|s| s.is_null())
        .unwrap_or(false));

    let _ = std::fs::remove_dir_all(workspace);
}
