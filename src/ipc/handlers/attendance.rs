use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub(crate) struct HandlerErr {
    pub(crate) code: &'static str,
    pub(crate) message: String,
    pub(crate) details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db_query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

const LEGACY_TYPES: &[&str] = &["IN", "OUT", "CUSTOM"];

/// Scan category reference: either a row in scan_types or one of the
/// legacy fixed enumeration values kept for old workspaces.
pub(crate) enum TypeRef {
    Id(String),
    Legacy(String),
}

impl TypeRef {
    fn from_params(params: &serde_json::Value) -> Result<Self, HandlerErr> {
        if let Some(type_id) = params.get("scanTypeId").and_then(|v| v.as_str()) {
            let type_id = type_id.trim();
            if !type_id.is_empty() {
                return Ok(TypeRef::Id(type_id.to_string()));
            }
        }
        if let Some(legacy) = params.get("type").and_then(|v| v.as_str()) {
            let legacy = legacy.trim().to_ascii_uppercase();
            if LEGACY_TYPES.contains(&legacy.as_str()) {
                return Ok(TypeRef::Legacy(legacy));
            }
            return Err(HandlerErr {
                code: "bad_params",
                message: "type must be IN, OUT or CUSTOM".to_string(),
                details: None,
            });
        }
        Err(HandlerErr {
            code: "bad_params",
            message: "missing scanTypeId or type".to_string(),
            details: None,
        })
    }

    fn label(&self) -> &str {
        match self {
            TypeRef::Id(v) => v,
            TypeRef::Legacy(v) => v,
        }
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

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

pub(crate) struct ScanRecorded {
    pub(crate) record: serde_json::Value,
    pub(crate) student: Option<serde_json::Value>,
    pub(crate) message: String,
}

/// The recording step: exact student match on (class_id, scanned_value),
/// attendance insert with a nullable student reference, audit-log append.
pub(crate) fn record_scan(
    conn: &Connection,
    user_id: &str,
    class_id: &str,
    scanned_value: &str,
    type_ref: &TypeRef,
    note: Option<&str>,
) -> Result<ScanRecorded, HandlerErr> {
    if !class_exists(conn, class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let student = conn
        .query_row(
            "SELECT id, student_id, name FROM students
             WHERE class_id = ? AND student_id = ?
             LIMIT 1",
            (class_id, scanned_value),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    let record_id = Uuid::new_v4().to_string();
    let created_at = db::now_utc();
    let student_row_id = student.as_ref().map(|(id, _, _)| id.clone());
    let (legacy_type, type_id) = match type_ref {
        TypeRef::Id(v) => (None, Some(v.clone())),
        TypeRef::Legacy(v) => (Some(v.clone()), None),
    };

    conn.execute(
        "INSERT INTO attendance(id, class_id, student_id, type, type_id, scanned_value, scanned_by, note, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &record_id,
            class_id,
            &student_row_id,
            &legacy_type,
            &type_id,
            scanned_value,
            user_id,
            &note,
            &created_at,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "attendance" })),
    })?;

    let metadata = json!({
        "type": type_ref.label(),
        "scannedValue": scanned_value,
        "matchedStudent": student.is_some(),
    });
    conn.execute(
        "INSERT INTO class_logs(id, class_id, user_id, action, metadata, created_at)
         VALUES(?, ?, ?, 'scan', ?, ?)",
        (
            Uuid::new_v4().to_string(),
            class_id,
            user_id,
            metadata.to_string(),
            db::now_utc(),
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "class_logs" })),
    })?;

    let record = json!({
        "id": record_id,
        "classId": class_id,
        "studentId": student_row_id,
        "type": legacy_type,
        "typeId": type_id,
        "scannedValue": scanned_value,
        "scannedBy": user_id,
        "note": note,
        "createdAt": created_at,
    });
    let student_json = student.as_ref().map(|(id, sid, name)| {
        json!({ "id": id, "studentId": sid, "name": name })
    });
    let message = match student.as_ref() {
        Some((_, _, name)) => format!("Marked {}", name),
        None => format!("Recorded scan: {}", scanned_value),
    };

    Ok(ScanRecorded {
        record,
        student: student_json,
        message,
    })
}

fn attendance_record(
    conn: &Connection,
    user_id: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let scanned_value = get_required_str(params, "scannedValue")?.trim().to_string();
    if scanned_value.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "scannedValue must not be empty".to_string(),
            details: None,
        });
    }
    let type_ref = TypeRef::from_params(params)?;
    let note = params
        .get("note")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let recorded = record_scan(
        conn,
        user_id,
        &class_id,
        &scanned_value,
        &type_ref,
        note.as_deref(),
    )?;
    Ok(json!({
        "record": recorded.record,
        "student": recorded.student,
        "message": recorded.message,
    }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    // Negative LIMIT means unlimited in SQLite; never bind one.
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(100)
        .clamp(1, 1000);

    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.class_id, a.student_id, a.type, a.type_id, a.scanned_value,
                    a.scanned_by, a.note, a.created_at, s.name, s.student_id, t.name
             FROM attendance a
             LEFT JOIN students s ON s.id = a.student_id
             LEFT JOIN scan_types t ON t.id = a.type_id
             WHERE a.class_id = ?
             ORDER BY a.created_at DESC, a.rowid DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::db_query)?;
    let records = stmt
        .query_map((&class_id, limit), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classId": row.get::<_, String>(1)?,
                "studentId": row.get::<_, Option<String>>(2)?,
                "type": row.get::<_, Option<String>>(3)?,
                "typeId": row.get::<_, Option<String>>(4)?,
                "scannedValue": row.get::<_, String>(5)?,
                "scannedBy": row.get::<_, String>(6)?,
                "note": row.get::<_, Option<String>>(7)?,
                "createdAt": row.get::<_, String>(8)?,
                "studentName": row.get::<_, Option<String>>(9)?,
                "studentCode": row.get::<_, Option<String>>(10)?,
                "typeName": row.get::<_, Option<String>>(11)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "records": records }))
}

/// Fixed export layout consumed by downstream spreadsheets; the column
/// set is part of the contract.
fn attendance_export_csv(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let out_path = get_required_str(params, "outPath")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT a.created_at, a.class_id, a.type, a.type_id, a.scanned_value, a.note, a.id,
                    s.name, s.student_id, t.name
             FROM attendance a
             LEFT JOIN students s ON s.id = a.student_id
             LEFT JOIN scan_types t ON t.id = a.type_id
             WHERE a.class_id = ?
             ORDER BY a.created_at DESC, a.rowid DESC",
        )
        .map_err(HandlerErr::db_query)?;

    struct ExportRow {
        created_at: String,
        class_id: String,
        legacy_type: Option<String>,
        scanned_value: String,
        note: Option<String>,
        record_id: String,
        student_name: Option<String>,
        student_code: Option<String>,
        type_name: Option<String>,
    }

    let rows = stmt
        .query_map([&class_id], |row| {
            Ok(ExportRow {
                created_at: row.get(0)?,
                class_id: row.get(1)?,
                legacy_type: row.get(2)?,
                scanned_value: row.get(4)?,
                note: row.get(5)?,
                record_id: row.get(6)?,
                student_name: row.get(7)?,
                student_code: row.get(8)?,
                type_name: row.get(9)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut writer = csv::Writer::from_path(&out_path).map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: Some(json!({ "path": out_path })),
    })?;
    let io_err = |e: csv::Error| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: None,
    };
    writer
        .write_record([
            "Timestamp",
            "ClassID",
            "Type",
            "Note",
            "StudentName",
            "StudentID",
            "RecordID",
        ])
        .map_err(io_err)?;
    let count = rows.len();
    for r in rows {
        let type_label = r
            .type_name
            .or(r.legacy_type)
            .unwrap_or_default();
        let student_id = r.student_code.unwrap_or(r.scanned_value);
        writer
            .write_record([
                r.created_at.as_str(),
                r.class_id.as_str(),
                type_label.as_str(),
                r.note.as_deref().unwrap_or(""),
                r.student_name.as_deref().unwrap_or(""),
                student_id.as_str(),
                r.record_id.as_str(),
            ])
            .map_err(io_err)?;
    }
    writer.flush().map_err(|e| HandlerErr {
        code: "io_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "outPath": out_path, "records": count }))
}

fn logs_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let limit = params
        .get("limit")
        .and_then(|v| v.as_i64())
        .unwrap_or(200)
        .clamp(1, 1000);

    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, user_id, action, metadata, created_at
             FROM class_logs
             WHERE class_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .map_err(HandlerErr::db_query)?;
    let logs = stmt
        .query_map((&class_id, limit), |row| {
            let metadata_raw: Option<String> = row.get(4)?;
            let metadata = metadata_raw
                .as_deref()
                .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classId": row.get::<_, String>(1)?,
                "userId": row.get::<_, String>(2)?,
                "action": row.get::<_, String>(3)?,
                "metadata": metadata,
                "createdAt": row.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "logs": logs }))
}

fn handle_attendance_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(user_id) = state.current_user_id().map(|s| s.to_string()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_record(conn, &user_id, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_attendance_export_csv(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_export_csv(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_logs_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match logs_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.record" => Some(handle_attendance_record(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.exportCsv" => Some(handle_attendance_export_csv(state, req)),
        "logs.list" => Some(handle_logs_list(state, req)),
        _ => None,
    }
}
