use serde_json::json;
use std::path::PathBuf;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_role, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::seed;
use crate::uploads;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "authenticated": state.session.is_some(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match db::open_db(&path) {
        Ok(conn) => {
            if let Err(e) = db::ensure_seed_users(&conn) {
                return err(&req.id, "db_open_failed", format!("{e:?}"), None);
            }
            // Housekeeping that must not block the workspace from opening.
            if let Err(e) = db::purge_expired_sessions(&conn) {
                tracing::warn!(error = %e, "failed to purge expired sessions");
            }
            if let Err(e) = std::fs::create_dir_all(uploads::upload_dir(&path)) {
                tracing::warn!(error = %e, "failed to create upload directory");
            }

            state.workspace = Some(path.clone());
            state.db = Some(conn);
            state.session = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_seed_demo(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Admin]) {
        return e;
    }
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match seed::seed_demo(conn) {
        Ok(summary) => ok(&req.id, json!(summary)),
        Err(e) => err(&req.id, "db_tx_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.seedDemo" => Some(handle_seed_demo(state, req)),
        _ => None,
    }
}
