use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::scan::{ScanController, UiCameraDecoder};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Signed-in identity. Process-wide: set by auth.signIn, cleared by
/// auth.signOut or a workspace switch. Handlers pull the current identity
/// from here instead of threading a live subscription through the core.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub session: Option<Session>,
    pub scan: ScanController<UiCameraDecoder>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            db: None,
            session: None,
            scan: ScanController::new(UiCameraDecoder::new()),
        }
    }

    pub fn current_user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user_id.as_str())
    }
}
