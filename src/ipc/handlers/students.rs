use crate::db;
use crate::import::{self, NormalizedStudent};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::Path;
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
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}

fn students_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?.trim().to_string();
    let name = get_required_str(params, "name")?.trim().to_string();
    if student_id.is_empty() || name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "studentId and name must not be empty".to_string(),
            details: None,
        });
    }
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, student_id, name, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, &class_id, &student_id, &name, db::now_utc()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "students" })),
    })?;

    Ok(json!({ "id": id, "studentId": student_id, "name": name }))
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, name, created_at
             FROM students
             WHERE class_id = ?
             ORDER BY name",
        )
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    let students = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "studentId": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "createdAt": row.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "students": students }))
}

/// Upsert keyed on (class_id, student_id), duplicates silently ignored.
/// Returns the number of rows actually inserted, so the reported import
/// count never exceeds what landed in the table.
fn bulk_upsert(
    conn: &Connection,
    class_id: &str,
    rows: &[NormalizedStudent],
) -> Result<usize, HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    let mut imported = 0usize;
    for r in rows {
        let changed = tx
            .execute(
                "INSERT INTO students(id, class_id, student_id, name, created_at)
                 VALUES(?, ?, ?, ?, ?)
                 ON CONFLICT(class_id, student_id) DO NOTHING",
                (
                    Uuid::new_v4().to_string(),
                    class_id,
                    &r.student_id,
                    &r.name,
                    db::now_utc(),
                ),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "students" })),
            })?;
        imported += changed;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(imported)
}

fn students_import(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let path = get_required_str(params, "path")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr {
            code: "not_found",
            message: "class not found".to_string(),
            details: None,
        });
    }

    let raw_rows = import::read_roster_file(Path::new(&path)).map_err(|e| HandlerErr {
        code: "io_failed",
        message: format!("{e:#}"),
        details: Some(json!({ "path": path })),
    })?;

    // Rows the ladder cannot place are dropped without a per-row failure.
    let rows: Vec<NormalizedStudent> = raw_rows
        .iter()
        .filter_map(import::extract_student_row)
        .collect();

    let imported = bulk_upsert(conn, &class_id, &rows)?;
    log::info!(
        "roster import class={} parsed={} submitted={} imported={}",
        class_id,
        raw_rows.len(),
        rows.len(),
        imported
    );

    Ok(json!({ "submitted": rows.len(), "imported": imported }))
}

fn with_auth_and_db<'a>(
    state: &'a mut AppState,
    req: &Request,
) -> Result<&'a Connection, serde_json::Value> {
    if state.current_user_id().is_none() {
        return Err(err(&req.id, "not_authenticated", "sign in first", None));
    }
    match state.db.as_ref() {
        Some(conn) => Ok(conn),
        None => Err(err(&req.id, "no_workspace", "select a workspace first", None)),
    }
}

fn handle_students_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match with_auth_and_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match students_add(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match students_list(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_students_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match with_auth_and_db(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    match students_import(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.add" => Some(handle_students_add(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.import" => Some(handle_students_import(state, req)),
        _ => None,
    }
}
