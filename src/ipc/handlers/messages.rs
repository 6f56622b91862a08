use rusqlite::OptionalExtension;
use serde_json::json;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_session, required_i64, required_str, user_by_id};
use crate::ipc::types::{AppState, Request};

/// Sentinel recipient for the shared broadcast channel.
const GROUP_CHANNEL_ID: i64 = 0;

fn handle_inbox(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Latest message per counterpart: MAX(id) within each conversation,
    // keyed by the non-current participant (recipient 0 groups broadcasts).
    let mut stmt = match conn.prepare(
        "SELECT u.id, u.username, m.content, m.created_at, m.is_read, m.sender_id
         FROM users u
         JOIN messages m ON (m.sender_id = u.id AND m.recipient_id = ?1)
                         OR (m.recipient_id = u.id AND m.sender_id = ?1)
         WHERE m.id IN (
             SELECT MAX(id) FROM messages
             WHERE sender_id = ?1 OR recipient_id = ?1
             GROUP BY CASE WHEN sender_id = ?1 THEN recipient_id ELSE sender_id END
         )
         ORDER BY m.created_at DESC, m.id DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let conversations = match stmt
        .query_map([session.user_id], |r| {
            Ok(json!({
                "otherUserId": r.get::<_, i64>(0)?,
                "otherUsername": r.get::<_, String>(1)?,
                "lastMessage": r.get::<_, String>(2)?,
                "createdAt": r.get::<_, String>(3)?,
                "isRead": r.get::<_, i64>(4)? != 0,
                "senderId": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let unread_total: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND is_read = 0",
        [session.user_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({ "conversations": conversations, "unreadTotal": unread_total }),
    )
}

fn handle_chat(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let other_user_id = match required_i64(req, "withUserId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if other_user_id == GROUP_CHANNEL_ID {
        // Full broadcast history; there is no read tracking on the shared
        // channel and no pagination.
        let mut stmt = match conn.prepare(
            "SELECT m.id, m.sender_id, u.username, u.role, m.content, m.created_at
             FROM messages m
             JOIN users u ON m.sender_id = u.id
             WHERE m.recipient_id = 0
             ORDER BY m.created_at ASC, m.id ASC",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let history = match stmt
            .query_map([], |r| {
                Ok(json!({
                    "id": r.get::<_, i64>(0)?,
                    "senderId": r.get::<_, i64>(1)?,
                    "senderName": r.get::<_, String>(2)?,
                    "senderRole": r.get::<_, String>(3)?,
                    "content": r.get::<_, String>(4)?,
                    "createdAt": r.get::<_, String>(5)?,
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        return ok(
            &req.id,
            json!({
                "otherUser": { "id": 0, "username": "Group Chat", "role": "Everyone" },
                "history": history,
            }),
        );
    }

    let other = match user_by_id(conn, other_user_id) {
        Ok(Some(u)) => u,
        Ok(None) => return err(&req.id, "not_found", "User not found.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Viewing the thread marks incoming messages read.
    if let Err(e) = conn.execute(
        "UPDATE messages SET is_read = 1 WHERE sender_id = ? AND recipient_id = ?",
        (other_user_id, session.user_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let mut stmt = match conn.prepare(
        "SELECT m.id, m.sender_id, u.username, m.content, m.is_read, m.created_at
         FROM messages m
         JOIN users u ON m.sender_id = u.id
         WHERE (m.sender_id = ?1 AND m.recipient_id = ?2)
            OR (m.sender_id = ?2 AND m.recipient_id = ?1)
         ORDER BY m.created_at ASC, m.id ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let history = match stmt
        .query_map([session.user_id, other_user_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "senderId": r.get::<_, i64>(1)?,
                "senderName": r.get::<_, String>(2)?,
                "content": r.get::<_, String>(3)?,
                "isRead": r.get::<_, i64>(4)? != 0,
                "createdAt": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "otherUser": { "id": other.id, "username": other.username, "role": other.role },
            "history": history,
        }),
    )
}

fn handle_send(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let recipient_id = match required_i64(req, "recipientId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content = match required_str(req, "content") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if content.trim().is_empty() {
        return err(
            &req.id,
            "validation_failed",
            "Message cannot be empty.",
            None,
        );
    }

    // Broadcasts require the sentinel channel user; direct messages a real
    // recipient.
    let recipient_exists: Option<i64> = match conn
        .query_row("SELECT id FROM users WHERE id = ?", [recipient_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if recipient_exists.is_none() {
        let message = if recipient_id == GROUP_CHANNEL_ID {
            "Group channel is not provisioned."
        } else {
            "User not found."
        };
        return err(&req.id, "not_found", message, None);
    }

    match conn.execute(
        "INSERT INTO messages (sender_id, recipient_id, content, created_at) VALUES (?, ?, ?, ?)",
        (session.user_id, recipient_id, &content, db::now_ts()),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "messageId": conn.last_insert_rowid(), "recipientId": recipient_id }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_contacts(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn
        .prepare("SELECT id, username, role FROM users WHERE id != ?")
    {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let users = match stmt
        .query_map([session.user_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "username": r.get::<_, String>(1)?,
                "role": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "users": users }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "messages.inbox" => Some(handle_inbox(state, req)),
        "messages.chat" => Some(handle_chat(state, req)),
        "messages.send" => Some(handle_send(state, req)),
        "messages.contacts" => Some(handle_contacts(state, req)),
        _ => None,
    }
}
