use rusqlite::Connection;
use serde_json::json;

use crate::calc;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_session, required_str};
use crate::ipc::types::{AppState, Request, Role};

const LANGUAGES: [(&str, &str); 9] = [
    ("en", "English"),
    ("hi", "Hindi (हिन्दी)"),
    ("bn", "Bengali (বাংলা)"),
    ("te", "Telugu (తెలుగు)"),
    ("mr", "Marathi (मराठी)"),
    ("ta", "Tamil (தமிழ்)"),
    ("gu", "Gujarati (ગુજરાતી)"),
    ("kn", "Kannada (ಕನ್ನಡ)"),
    ("ml", "Malayalam (മലയാളം)"),
];

fn recent_notifications(
    conn: &Connection,
    user_id: i64,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let mut stmt = conn.prepare(
        "SELECT id, message, type, is_read, created_at FROM notifications
         WHERE user_id = ?
         ORDER BY created_at DESC LIMIT 5",
    )?;
    stmt.query_map([user_id], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "message": r.get::<_, String>(1)?,
            "type": r.get::<_, String>(2)?,
            "isRead": r.get::<_, i64>(3)? != 0,
            "createdAt": r.get::<_, String>(4)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn unread_message_count(conn: &Connection, user_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient_id = ? AND is_read = 0",
        [user_id],
        |r| r.get(0),
    )
}

fn stats_card(label: &str, value: serde_json::Value) -> serde_json::Value {
    json!({ "label": label, "value": value })
}

fn handle_dashboard_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let notifications = match recent_notifications(conn, session.user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let unread_messages = match unread_message_count(conn, session.user_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut chart = json!({
        "gradeLabels": [],
        "gradeValues": [],
        "attendanceLabels": ["Present", "Absent", "Late"],
        "attendanceValues": [0, 0, 0],
    });
    let stats;
    let mut recent_activity: Vec<serde_json::Value> = Vec::new();

    match session.role {
        Role::Student => {
            let averages = match calc::student_course_averages(conn, session.user_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, &e.code, e.message, None),
            };
            chart["gradeLabels"] = json!(averages.iter().map(|c| c.name.clone()).collect::<Vec<_>>());
            chart["gradeValues"] =
                json!(averages.iter().map(|c| calc::round_1(c.avg_score)).collect::<Vec<_>>());

            let attendance = match calc::student_attendance_counts(conn, session.user_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, &e.code, e.message, None),
            };
            chart["attendanceValues"] =
                json!([attendance.present, attendance.absent, attendance.late]);

            let gpa = calc::cumulative_gpa(&averages);
            let status = if gpa >= 3.5 { "Academic Honor" } else { "Active" };
            stats = json!([
                stats_card("Current GPA", json!(format!("{:.2} / 4.0", gpa))),
                stats_card("Total Courses", json!(averages.len())),
                stats_card("Attendance Rate", json!(attendance.rate_label())),
                stats_card("Status", json!(status)),
            ]);

            let mut stmt = match conn.prepare(
                "SELECT a.title, c.name, a.due_date
                 FROM assignments a
                 JOIN courses c ON a.course_id = c.id
                 JOIN enrollments e ON c.id = e.course_id
                 WHERE e.student_id = ?
                 ORDER BY a.created_at DESC LIMIT 5",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            recent_activity = match stmt
                .query_map([session.user_id], |r| {
                    Ok(json!({
                        "title": r.get::<_, String>(0)?,
                        "courseName": r.get::<_, String>(1)?,
                        "dueDate": r.get::<_, Option<String>>(2)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
        }
        Role::Teacher => {
            let averages = match calc::teacher_course_averages(conn, session.user_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, &e.code, e.message, None),
            };
            chart["gradeLabels"] = json!(averages.iter().map(|c| c.name.clone()).collect::<Vec<_>>());
            chart["gradeValues"] =
                json!(averages.iter().map(|c| calc::round_1(c.avg_score)).collect::<Vec<_>>());

            let attendance = match calc::teacher_attendance_counts(conn, session.user_id) {
                Ok(v) => v,
                Err(e) => return err(&req.id, &e.code, e.message, None),
            };
            chart["attendanceValues"] =
                json!([attendance.present, attendance.absent, attendance.late]);

            let total_students: i64 = match conn.query_row(
                "SELECT COUNT(DISTINCT e.student_id)
                 FROM enrollments e JOIN courses c ON e.course_id = c.id
                 WHERE c.teacher_id = ?",
                [session.user_id],
                |r| r.get(0),
            ) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };

            let class_avg = match calc::class_average(&averages) {
                Some(avg) => format!("{}%", avg),
                None => "0%".to_string(),
            };
            stats = json!([
                stats_card("Class Average", json!(class_avg)),
                stats_card("My Courses", json!(averages.len())),
                stats_card("Total Students", json!(total_students)),
                stats_card("Status", json!("Teacher Profile")),
            ]);

            let mut stmt = match conn.prepare(
                "SELECT u.username, a.title, s.submission_date
                 FROM submissions s
                 JOIN assignments a ON s.assignment_id = a.id
                 JOIN courses c ON a.course_id = c.id
                 JOIN users u ON s.student_id = u.id
                 WHERE c.teacher_id = ?
                 ORDER BY s.submission_date DESC LIMIT 5",
            ) {
                Ok(s) => s,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            recent_activity = match stmt
                .query_map([session.user_id], |r| {
                    Ok(json!({
                        "studentName": r.get::<_, String>(0)?,
                        "assignmentTitle": r.get::<_, String>(1)?,
                        "submissionDate": r.get::<_, Option<String>>(2)?,
                    }))
                })
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
        }
        Role::Admin | Role::Group => {
            let users: i64 = match conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0)) {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            let courses: i64 =
                match conn.query_row("SELECT COUNT(*) FROM courses", [], |r| r.get(0)) {
                    Ok(v) => v,
                    Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
                };
            stats = json!([
                stats_card("System", json!("Online")),
                stats_card("Users", json!(users)),
                stats_card("Courses", json!(courses)),
                stats_card("Role", json!(session.role.title())),
            ]);
        }
    }

    ok(
        &req.id,
        json!({
            "chartData": chart,
            "stats": stats,
            "recentActivity": recent_activity,
            "notifications": notifications,
            "unreadMessagesCount": unread_messages,
        }),
    )
}

fn language_key(user_id: i64) -> String {
    format!("lang.{}", user_id)
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let current = match db::settings_get(conn, &language_key(session.user_id)) {
        Ok(v) => v.unwrap_or_else(|| "en".to_string()),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let languages: Vec<serde_json::Value> = LANGUAGES
        .iter()
        .map(|(code, name)| json!({ "code": code, "name": name }))
        .collect();

    ok(
        &req.id,
        json!({ "currentLanguage": current, "languages": languages }),
    )
}

fn handle_set_language(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let language = match required_str(req, "language") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if !LANGUAGES.iter().any(|(code, _)| *code == language) {
        return err(
            &req.id,
            "validation_failed",
            format!("unsupported language: {}", language),
            None,
        );
    }
    if let Err(e) = db::settings_set(conn, &language_key(session.user_id), &language) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "language": language, "message": "Language changed successfully!" }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.open" => Some(handle_dashboard_open(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.setLanguage" => Some(handle_set_language(state, req)),
        _ => None,
    }
}
