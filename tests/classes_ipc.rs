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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

#[test]
fn create_join_by_code_and_owner_only_delete() {
    let workspace = temp_dir("attendanced-classes");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    // Owner creates the class and gets a share code.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "auth.signIn",
        json!({ "email": "owner@example.com", "displayName": "Owner" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "Homeroom" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let code = created
        .get("code")
        .and_then(|v| v.as_str())
        .expect("code")
        .to_string();
    assert_eq!(code.len(), 6);

    // A second user joins as moderator via the code.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "auth.signIn",
        json!({ "email": "mod@example.com", "displayName": "Mod" }),
    );
    let unknown = request(
        &mut stdin,
        &mut reader,
        "j0",
        "classes.join",
        json!({ "code": "ZZZZZZ" }),
    );
    assert_eq!(error_code(&unknown), "not_found");

    let joined = request_ok(
        &mut stdin,
        &mut reader,
        "j1",
        "classes.join",
        json!({ "code": code }),
    );
    assert_eq!(
        joined.get("classId").and_then(|v| v.as_str()),
        Some(class_id.as_str())
    );
    // Joining again is a quiet no-op.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "j2",
        "classes.join",
        json!({ "code": code }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "l1", "classes.list", json!({}));
    let classes = listed
        .get("classes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(classes.len(), 1, "moderated class shows up in the list");

    let moderators = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "moderators.list",
        json!({ "classId": class_id }),
    );
    let mods = moderators
        .get("moderators")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(mods.len(), 1);
    assert_eq!(
        mods[0].get("email").and_then(|v| v.as_str()),
        Some("mod@example.com")
    );

    // Moderators cannot delete the class.
    let denied = request(
        &mut stdin,
        &mut reader,
        "d1",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    // The owner can, even with moderators and students attached.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "auth.signIn",
        json!({ "email": "owner@example.com" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "students.add",
        json!({ "classId": class_id, "studentId": "1", "name": "A Student" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "d2",
        "classes.delete",
        json!({ "classId": class_id }),
    );
    let listed2 = request_ok(&mut stdin, &mut reader, "l2", "classes.list", json!({}));
    assert_eq!(
        listed2
            .get("classes")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn moderator_removal_is_owner_only() {
    let workspace = temp_dir("attendanced-mod-remove");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "auth.signIn",
        json!({ "email": "owner@example.com" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "Guarded" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let code = created
        .get("code")
        .and_then(|v| v.as_str())
        .expect("code")
        .to_string();

    let joined = request_ok(
        &mut stdin,
        &mut reader,
        "a2",
        "auth.signIn",
        json!({ "email": "mod@example.com" }),
    );
    let mod_id = joined
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "j1",
        "classes.join",
        json!({ "code": code }),
    );

    // The moderator cannot remove themselves, nor anyone else.
    let denied = request(
        &mut stdin,
        &mut reader,
        "m1",
        "moderators.remove",
        json!({ "classId": class_id, "userId": mod_id }),
    );
    assert_eq!(error_code(&denied), "forbidden");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a3",
        "auth.signIn",
        json!({ "email": "owner@example.com" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "moderators.remove",
        json!({ "classId": class_id, "userId": mod_id }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "m3",
        "moderators.list",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        listed
            .get("moderators")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn class_list_includes_student_counts() {
    let workspace = temp_dir("attendanced-classes-counts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "a1",
        "auth.signIn",
        json!({ "email": "owner@example.com" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "classes.create",
        json!({ "name": "Counted" }),
    );
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    for (i, (sid, name)) in [("10", "Ada"), ("11", "Grace")].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("s{}", i),
            "students.add",
            json!({ "classId": class_id, "studentId": sid, "name": name }),
        );
    }

    let listed = request_ok(&mut stdin, &mut reader, "l1", "classes.list", json!({}));
    let classes = listed
        .get("classes")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(classes.len(), 1);
    assert_eq!(
        classes[0].get("studentCount").and_then(|v| v.as_i64()),
        Some(2)
    );

    let _ = std::fs::remove_dir_all(workspace);
}
