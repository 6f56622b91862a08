use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::db;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request, Role, Session};

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_i64(req: &Request, key: &str) -> Result<i64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn required_f64(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn opt_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn opt_bool(req: &Request, key: &str) -> bool {
    req.params
        .get(key)
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

/// Authenticated caller or an `unauthorized` error. Remembered sessions
/// past their expiry are rejected here.
pub fn require_session<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Session, serde_json::Value> {
    let session = state
        .session
        .as_ref()
        .ok_or_else(|| err(&req.id, "unauthorized", "login required", None))?;
    if let Some(expires_at) = session.expires_at {
        if expires_at < Utc::now() {
            return Err(err(&req.id, "unauthorized", "session expired", None));
        }
    }
    Ok(session)
}

/// Role gate. The message is the user-facing flash text; the shell turns
/// this into a dashboard redirect.
pub fn require_role<'a>(
    state: &'a AppState,
    req: &Request,
    allowed: &[Role],
) -> Result<&'a Session, serde_json::Value> {
    let session = require_session(state, req)?;
    if !allowed.contains(&session.role) {
        return Err(err(&req.id, "forbidden", "Unauthorized access.", None));
    }
    Ok(session)
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

pub fn user_by_username(conn: &Connection, username: &str) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, password_hash, role FROM users WHERE username = ?",
        [username],
        |r| {
            Ok(UserRow {
                id: r.get(0)?,
                username: r.get(1)?,
                password_hash: r.get(2)?,
                role: r.get(3)?,
            })
        },
    )
    .optional()
}

pub fn user_by_id(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, password_hash, role FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(UserRow {
                id: r.get(0)?,
                username: r.get(1)?,
                password_hash: r.get(2)?,
                role: r.get(3)?,
            })
        },
    )
    .optional()
}

/// Appends to the user-scoped notification log read by the dashboard.
pub fn add_notification(
    conn: &Connection,
    user_id: i64,
    message: &str,
    n_type: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO notifications (user_id, message, type, created_at) VALUES (?, ?, ?, ?)",
        (user_id, message, n_type, db::now_ts()),
    )?;
    Ok(())
}
