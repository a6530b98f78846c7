use super::attendance::{record_scan, TypeRef};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::scan::{DecodeOutcome, ScanError};
use serde_json::json;

fn scan_error_response(id: &str, e: ScanError) -> serde_json::Value {
    let code = match &e {
        ScanError::Validation(_) => "bad_params",
        ScanError::Busy => "scan_busy",
        ScanError::Permission => "permission_denied",
        ScanError::DecodeStart(_) => "decode_start_failed",
    };
    err(id, code, e.to_string(), None)
}

fn handle_scan_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    if state.current_user_id().is_none() {
        return err(&req.id, "not_authenticated", "sign in first", None);
    }

    let class_id = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let scan_type_id = req
        .params
        .get("scanTypeId")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let device_id = req.params.get("deviceId").and_then(|v| v.as_str());

    match state.scan.start(class_id, scan_type_id, device_id) {
        Ok(()) => ok(
            &req.id,
            json!({
                "status": state.scan.status().as_str(),
                "deviceId": state.scan.session().map(|s| s.device_id.clone()),
            }),
        ),
        Err(e) => scan_error_response(&req.id, e),
    }
}

/// Decode-callback path: the camera bridge delivers one decoded symbol.
/// The first non-empty symbol closes the session, releases the camera and
/// records attendance exactly once; anything after that is ignored.
fn handle_scan_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(user_id) = state.current_user_id().map(|s| s.to_string()) else {
        return err(&req.id, "not_authenticated", "sign in first", None);
    };

    let value = req
        .params
        .get("value")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    let outcome = state.scan.handle_decode(value);
    let (class_id, scan_type_id, value) = match outcome {
        DecodeOutcome::Ignored => {
            return ok(
                &req.id,
                json!({
                    "accepted": false,
                    "status": state.scan.status().as_str(),
                }),
            )
        }
        DecodeOutcome::Accepted {
            class_id,
            scan_type_id,
            value,
        } => (class_id, scan_type_id, value),
    };

    // Camera is released by now; a recording failure is terminal for this
    // attempt and the user re-scans.
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let type_ref = TypeRef::Id(scan_type_id);
    let note = req.params.get("note").and_then(|v| v.as_str());
    match record_scan(conn, &user_id, &class_id, &value, &type_ref, note) {
        Ok(recorded) => ok(
            &req.id,
            json!({
                "accepted": true,
                "record": recorded.record,
                "student": recorded.student,
                "message": recorded.message,
            }),
        ),
        Err(e) => err(&req.id, e.code, e.message, e.details),
    }
}

fn handle_scan_stop(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.scan.stop();
    ok(&req.id, json!({ "status": state.scan.status().as_str() }))
}

fn handle_scan_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = state.scan.session().map(|s| {
        json!({
            "classId": s.class_id,
            "scanTypeId": s.scan_type_id,
            "deviceId": s.device_id,
        })
    });
    ok(
        &req.id,
        json!({
            "status": state.scan.status().as_str(),
            "session": session,
        }),
    )
}

fn handle_scan_devices(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.scan.devices() {
        Ok(devices) => {
            let devices: Vec<serde_json::Value> = devices
                .into_iter()
                .map(|d| json!({ "id": d.id, "label": d.label }))
                .collect();
            ok(&req.id, json!({ "devices": devices }))
        }
        Err(e) => scan_error_response(&req.id, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scan.start" => Some(handle_scan_start(state, req)),
        "scan.submit" => Some(handle_scan_submit(state, req)),
        "scan.stop" => Some(handle_scan_stop(state, req)),
        "scan.status" => Some(handle_scan_status(state, req)),
        "scan.devices" => Some(handle_scan_devices(state, req)),
        _ => None,
    }
}
