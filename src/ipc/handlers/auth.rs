use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request, Session};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_sign_in(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let email = match req.params.get("email").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_ascii_lowercase(),
        None => return err(&req.id, "bad_params", "missing email", None),
    };
    if email.is_empty() {
        return err(&req.id, "bad_params", "email must not be empty", None);
    }
    let display_name = req
        .params
        .get("displayName")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let existing = conn
        .query_row(
            "SELECT id, display_name FROM profiles WHERE email = ?",
            [&email],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, Option<String>>(1)?)),
        )
        .optional();

    let (user_id, display_name) = match existing {
        Ok(Some((id, stored_name))) => (id, display_name.or(stored_name)),
        Ok(None) => {
            let id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO profiles(id, email, display_name, created_at) VALUES(?, ?, ?, ?)",
                (&id, &email, &display_name, db::now_utc()),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "profiles" })),
                );
            }
            (id, display_name)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    log::info!("signed in {}", email);
    state.session = Some(Session {
        user_id: user_id.clone(),
        email: email.clone(),
        display_name: display_name.clone(),
    });

    ok(
        &req.id,
        json!({ "userId": user_id, "email": email, "displayName": display_name }),
    )
}

fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Some(s) = state.session.take() {
        log::info!("signed out {}", s.email);
    }
    // A live decode session belongs to the user who started it.
    state.scan.stop();
    ok(&req.id, json!({ "ok": true }))
}

fn handle_session(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = state.session.as_ref().map(|s| {
        json!({
            "userId": s.user_id,
            "email": s.email,
            "displayName": s.display_name,
        })
    });
    ok(&req.id, json!({ "session": session }))
}

fn handle_profile_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(user_id) = state.session.as_ref().map(|s| s.user_id.clone()) else {
        return ok(&req.id, json!({ "profile": serde_json::Value::Null }));
    };

    let profile = conn
        .query_row(
            "SELECT id, email, display_name, created_at FROM profiles WHERE id = ?",
            [&user_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "email": r.get::<_, String>(1)?,
                    "displayName": r.get::<_, Option<String>>(2)?,
                    "createdAt": r.get::<_, String>(3)?,
                }))
            },
        )
        .optional();

    match profile {
        Ok(p) => ok(&req.id, json!({ "profile": p })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_profile_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(user_id) = state.session.as_ref().map(|s| s.user_id.clone()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };

    let display_name = match req.params.get("displayName").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing displayName", None),
    };

    if let Err(e) = conn.execute(
        "UPDATE profiles SET display_name = ? WHERE id = ?",
        (&display_name, &user_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "profiles" })),
        );
    }
    if let Some(s) = state.session.as_mut() {
        s.display_name = Some(display_name.clone());
    }
    ok(&req.id, json!({ "displayName": display_name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.signIn" => Some(handle_sign_in(state, req)),
        "auth.signOut" => Some(handle_sign_out(state, req)),
        "auth.session" => Some(handle_session(state, req)),
        "profile.get" => Some(handle_profile_get(state, req)),
        "profile.update" => Some(handle_profile_update(state, req)),
        _ => None,
    }
}
