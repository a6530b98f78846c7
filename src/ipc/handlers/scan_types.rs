use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_scan_types_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, class_id, name, created_at
         FROM scan_types
         WHERE class_id = ?
         ORDER BY created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classId": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "createdAt": row.get::<_, String>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(types) => ok(&req.id, json!({ "scanTypes": types })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_scan_types_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.current_user_id().is_none() {
        return err(&req.id, "not_authenticated", "sign in first", None);
    }
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let type_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO scan_types(id, class_id, name, created_at) VALUES(?, ?, ?, ?)",
        (&type_id, &class_id, &name, db::now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "scan_types" })),
        );
    }

    ok(&req.id, json!({ "typeId": type_id, "name": name }))
}

fn handle_scan_types_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    if state.current_user_id().is_none() {
        return err(&req.id, "not_authenticated", "sign in first", None);
    }
    let type_id = match req.params.get("typeId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing typeId", None),
    };

    match conn.execute("DELETE FROM scan_types WHERE id = ?", [&type_id]) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "scan_types" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scanTypes.list" => Some(handle_scan_types_list(state, req)),
        "scanTypes.add" => Some(handle_scan_types_add(state, req)),
        "scanTypes.delete" => Some(handle_scan_types_delete(state, req)),
        _ => None,
    }
}
