use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

// Share codes are short and human-typeable; hex from a v4 uuid is enough
// entropy at this scale.
fn generate_join_code() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_ascii_uppercase()
}

/// First candidate not already taken by a class. Collisions are rare at
/// six hex chars but cheap to retry past; a taken code must never reach
/// the UNIQUE constraint on classes.code.
fn first_unused_code<I>(conn: &Connection, candidates: I) -> rusqlite::Result<Option<String>>
where
    I: IntoIterator<Item = String>,
{
    for code in candidates {
        let taken = conn
            .query_row("SELECT 1 FROM classes WHERE code = ?", [&code], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?;
        if taken.is_none() {
            return Ok(Some(code));
        }
    }
    Ok(None)
}

fn unused_join_code(conn: &Connection) -> rusqlite::Result<Option<String>> {
    first_unused_code(conn, (0..5).map(|_| generate_join_code()))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(owner_id) = state.current_user_id().map(|s| s.to_string()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let class_id = Uuid::new_v4().to_string();
    let code = match unused_join_code(conn) {
        Ok(Some(c)) => c,
        Ok(None) => {
            return err(
                &req.id,
                "db_insert_failed",
                "could not allocate an unused join code",
                Some(json!({ "table": "classes" })),
            )
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, owner_id, name, code, created_at) VALUES(?, ?, ?, ?, ?)",
        (&class_id, &owner_id, &name, &code, db::now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "classes" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "code": code }),
    )
}

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "classes": [] }));
    };
    // Mirrors the signed-out UI: an empty dashboard, not an error.
    let Some(user_id) = state.current_user_id().map(|s| s.to_string()) else {
        return ok(&req.id, json!({ "classes": [] }));
    };

    let mut stmt = match conn.prepare(
        "SELECT
           c.id,
           c.name,
           c.code,
           c.owner_id,
           (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
         FROM classes c
         WHERE c.owner_id = ?1
            OR c.id IN (SELECT m.class_id FROM class_moderators m WHERE m.user_id = ?1)
         ORDER BY c.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&user_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "code": row.get::<_, String>(2)?,
                "ownerId": row.get::<_, String>(3)?,
                "studentCount": row.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(classes) => ok(&req.id, json!({ "classes": classes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_classes_join(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(user_id) = state.current_user_id().map(|s| s.to_string()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };

    let code = match req.params.get("code").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_uppercase(),
        None => return err(&req.id, "bad_params", "missing code", None),
    };
    if code.is_empty() {
        return err(&req.id, "bad_params", "code must not be empty", None);
    }

    let found = conn
        .query_row(
            "SELECT id, name, code FROM classes WHERE code = ?",
            [&code],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            },
        )
        .optional();
    let (class_id, name, code) = match found {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "no class with that code", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Joining twice is a no-op, same as a duplicate-key insert being ignored.
    if let Err(e) = conn.execute(
        "INSERT INTO class_moderators(id, class_id, user_id, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(class_id, user_id) DO NOTHING",
        (Uuid::new_v4().to_string(), &class_id, &user_id, db::now_utc()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "class_moderators" })),
        );
    }

    ok(
        &req.id,
        json!({ "classId": class_id, "name": name, "code": code }),
    )
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(user_id) = state.current_user_id().map(|s| s.to_string()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let owner: Option<String> = match conn
        .query_row("SELECT owner_id FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(owner_id) = owner else {
        return err(&req.id, "not_found", "class not found", None);
    };
    if owner_id != user_id {
        return err(&req.id, "forbidden", "only the owner may delete a class", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicit dependency order; no ON DELETE CASCADE in the schema.
    let deletes: &[(&str, &str)] = &[
        ("DELETE FROM class_logs WHERE class_id = ?", "class_logs"),
        ("DELETE FROM attendance WHERE class_id = ?", "attendance"),
        ("DELETE FROM scan_types WHERE class_id = ?", "scan_types"),
        ("DELETE FROM students WHERE class_id = ?", "students"),
        (
            "DELETE FROM class_moderators WHERE class_id = ?",
            "class_moderators",
        ),
        ("DELETE FROM classes WHERE id = ?", "classes"),
    ];
    for (sql, table) in deletes {
        if let Err(e) = tx.execute(sql, [&class_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_moderators_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT m.id, m.class_id, m.user_id, m.created_at, p.display_name, p.email
         FROM class_moderators m
         JOIN profiles p ON p.id = m.user_id
         WHERE m.class_id = ?
         ORDER BY m.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "classId": row.get::<_, String>(1)?,
                "userId": row.get::<_, String>(2)?,
                "createdAt": row.get::<_, String>(3)?,
                "displayName": row.get::<_, Option<String>>(4)?,
                "email": row.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(moderators) => ok(&req.id, json!({ "moderators": moderators })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_moderators_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(caller_id) = state.current_user_id().map(|s| s.to_string()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };

    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let user_id = match req.params.get("userId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing userId", None),
    };

    // Same ownership rule as classes.delete.
    let owner: Option<String> = match conn
        .query_row("SELECT owner_id FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(owner_id) = owner else {
        return err(&req.id, "not_found", "class not found", None);
    };
    if owner_id != caller_id {
        return err(
            &req.id,
            "forbidden",
            "only the owner may remove moderators",
            None,
        );
    }

    match conn.execute(
        "DELETE FROM class_moderators WHERE class_id = ? AND user_id = ?",
        (&class_id, &user_id),
    ) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "class_moderators" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.join" => Some(handle_classes_join(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        "moderators.list" => Some(handle_moderators_list(state, req)),
        "moderators.remove" => Some(handle_moderators_remove(state, req)),
        _ => None,
    }
}
