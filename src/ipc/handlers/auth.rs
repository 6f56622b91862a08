use chrono::{Duration, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    db_conn, opt_bool, opt_str, require_session, required_str, user_by_id, user_by_username,
};
use crate::ipc::types::{AppState, Request, Role, Session};
use crate::passwd;

const REMEMBER_DAYS: i64 = 30;

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "userId": session.user_id,
        "username": session.username,
        "role": session.role.as_str(),
        "token": session.token,
        "expiresAt": session.expires_at.map(|t| t.to_rfc3339()),
    })
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let password = match required_str(req, "password") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let claimed = opt_str(req, "role").unwrap_or_else(|| "student".to_string());
    let remember = opt_bool(req, "remember");

    let Some(claimed_role) = Role::parse(&claimed) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown role: {}", claimed),
            None,
        );
    };

    let user = match user_by_username(conn, &username) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(user) = user else {
        return err(
            &req.id,
            "invalid_credentials",
            "Invalid username or password",
            None,
        );
    };
    if !passwd::verify_password(&password, &user.password_hash) {
        return err(
            &req.id,
            "invalid_credentials",
            "Invalid username or password",
            None,
        );
    }

    let Some(actual_role) = Role::parse(&user.role) else {
        return err(&req.id, "db_query_failed", "account has no usable role", None);
    };
    // The role picker on the login form must match the account's real
    // role. The message names that role; see DESIGN.md on the disclosure.
    if actual_role != claimed_role {
        return err(
            &req.id,
            "role_mismatch",
            format!(
                "Invalid login. This account is registered as a {}, not a {}.",
                actual_role.title(),
                claimed_role.title()
            ),
            None,
        );
    }

    let (token, expires_at) = if remember {
        let token = Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + Duration::days(REMEMBER_DAYS);
        if let Err(e) = conn.execute(
            "INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)",
            (
                &token,
                user.id,
                expires_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
        ) {
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
        (Some(token), Some(expires_at))
    } else {
        (None, None)
    };

    let session = Session {
        user_id: user.id,
        username: user.username.clone(),
        role: actual_role,
        token,
        expires_at,
    };
    let mut result = session_json(&session);
    result["message"] = json!(format!("Welcome back, {}!", user.username));
    state.session = Some(session);

    ok(&req.id, result)
}

fn handle_resume(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let token = match required_str(req, "token") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(i64, String)> = match conn
        .query_row(
            "SELECT user_id, expires_at FROM sessions WHERE token = ?",
            [&token],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((user_id, expires_at)) = row else {
        return err(&req.id, "unauthorized", "unknown or expired session", None);
    };

    let expires_at = match chrono::NaiveDateTime::parse_from_str(&expires_at, "%Y-%m-%d %H:%M:%S")
    {
        Ok(naive) => naive.and_utc(),
        Err(_) => return err(&req.id, "unauthorized", "unknown or expired session", None),
    };
    if expires_at < Utc::now() {
        let _ = conn.execute("DELETE FROM sessions WHERE token = ?", [&token]);
        return err(&req.id, "unauthorized", "unknown or expired session", None);
    }

    let user = match user_by_id(conn, user_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "unauthorized", "unknown or expired session", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(role) = Role::parse(&user.role) else {
        return err(&req.id, "unauthorized", "account has no usable role", None);
    };

    let session = Session {
        user_id: user.id,
        username: user.username,
        role,
        token: Some(token),
        expires_at: Some(expires_at),
    };
    let result = session_json(&session);
    state.session = Some(session);
    ok(&req.id, result)
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_session(state, req) {
        return e;
    }
    let token = state.session.as_ref().and_then(|s| s.token.clone());
    if let (Some(conn), Some(token)) = (state.db.as_ref(), token) {
        if let Err(e) = conn.execute("DELETE FROM sessions WHERE token = ?", [&token]) {
            tracing::warn!(error = %e, "failed to drop persisted session");
        }
    }
    state.session = None;
    ok(&req.id, json!({ "loggedOut": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match require_session(state, req) {
        Ok(session) => ok(&req.id, session_json(session)),
        Err(e) => e,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        "auth.resume" => Some(handle_resume(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
