use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::path::Path;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    add_notification, db_conn, opt_str, require_role, require_session, required_i64, required_str,
    user_by_username,
};
use crate::ipc::types::{AppState, Request, Role};
use crate::uploads;

#[derive(Debug, Clone)]
struct CourseRow {
    id: i64,
    name: String,
    teacher_id: i64,
    schedule: Option<String>,
}

fn course_by_id(conn: &Connection, course_id: i64) -> rusqlite::Result<Option<CourseRow>> {
    conn.query_row(
        "SELECT id, name, teacher_id, schedule FROM courses WHERE id = ?",
        [course_id],
        |r| {
            Ok(CourseRow {
                id: r.get(0)?,
                name: r.get(1)?,
                teacher_id: r.get(2)?,
                schedule: r.get(3)?,
            })
        },
    )
    .optional()
}

fn course_json(course: &CourseRow, teacher_name: Option<&str>) -> serde_json::Value {
    json!({
        "id": course.id,
        "name": course.name,
        "teacherId": course.teacher_id,
        "teacherName": teacher_name,
        "schedule": course.schedule,
    })
}

fn list_courses(
    conn: &Connection,
    role: Role,
    user_id: i64,
    filter: Option<&str>,
) -> rusqlite::Result<Vec<serde_json::Value>> {
    let pattern = filter.map(|q| format!("%{}%", q));
    let (sql, params): (&str, Vec<&dyn rusqlite::ToSql>) = match role {
        Role::Teacher => match &pattern {
            Some(p) => (
                "SELECT c.id, c.name, c.teacher_id, c.schedule, u.username
                 FROM courses c JOIN users u ON c.teacher_id = u.id
                 WHERE c.teacher_id = ?1 AND c.name LIKE ?2",
                vec![&user_id, p],
            ),
            None => (
                "SELECT c.id, c.name, c.teacher_id, c.schedule, u.username
                 FROM courses c JOIN users u ON c.teacher_id = u.id
                 WHERE c.teacher_id = ?1",
                vec![&user_id],
            ),
        },
        Role::Student => match &pattern {
            Some(p) => (
                "SELECT c.id, c.name, c.teacher_id, c.schedule, u.username
                 FROM courses c
                 JOIN enrollments e ON c.id = e.course_id
                 JOIN users u ON c.teacher_id = u.id
                 WHERE e.student_id = ?1 AND c.name LIKE ?2",
                vec![&user_id, p],
            ),
            None => (
                "SELECT c.id, c.name, c.teacher_id, c.schedule, u.username
                 FROM courses c
                 JOIN enrollments e ON c.id = e.course_id
                 JOIN users u ON c.teacher_id = u.id
                 WHERE e.student_id = ?1",
                vec![&user_id],
            ),
        },
        Role::Admin | Role::Group => match &pattern {
            Some(p) => (
                "SELECT c.id, c.name, c.teacher_id, c.schedule, u.username
                 FROM courses c LEFT JOIN users u ON c.teacher_id = u.id
                 WHERE c.name LIKE ?1",
                vec![p],
            ),
            None => (
                "SELECT c.id, c.name, c.teacher_id, c.schedule, u.username
                 FROM courses c LEFT JOIN users u ON c.teacher_id = u.id",
                vec![],
            ),
        },
    };

    let mut stmt = conn.prepare(sql)?;
    stmt.query_map(&params[..], |r| {
        Ok(json!({
            "id": r.get::<_, i64>(0)?,
            "name": r.get::<_, String>(1)?,
            "teacherId": r.get::<_, i64>(2)?,
            "schedule": r.get::<_, Option<String>>(3)?,
            "teacherName": r.get::<_, Option<String>>(4)?,
        }))
    })
    .and_then(|it| it.collect())
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    match list_courses(conn, session.role, session.user_id, None) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let query = opt_str(req, "q").unwrap_or_default();
    match list_courses(conn, session.role, session.user_id, Some(&query)) {
        Ok(courses) => ok(&req.id, json!({ "courses": courses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course = match course_by_id(conn, course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "Course not found.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if session.role == Role::Teacher && course.teacher_id != session.user_id {
        return err(&req.id, "forbidden", "Unauthorized access.", None);
    }

    let mut assign_stmt = match conn.prepare(
        "SELECT id, title, description, due_date, attachment_path, created_at
         FROM assignments WHERE course_id = ? ORDER BY due_date",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let assignments = match assign_stmt
        .query_map([course_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "dueDate": r.get::<_, Option<String>>(3)?,
                "attachmentPath": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut roster_stmt = match conn.prepare(
        "SELECT u.id, u.username, sd.full_name
         FROM users u
         JOIN enrollments e ON u.id = e.student_id
         LEFT JOIN student_details sd ON u.id = sd.user_id
         WHERE e.course_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match roster_stmt
        .query_map([course_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "username": r.get::<_, String>(1)?,
                "fullName": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut avail_stmt = match conn.prepare(
        "SELECT u.id, u.username, sd.full_name
         FROM users u
         LEFT JOIN student_details sd ON u.id = sd.user_id
         WHERE u.role = 'student'
           AND u.id NOT IN (SELECT student_id FROM enrollments WHERE course_id = ?)
         ORDER BY u.username",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let available_students = match avail_stmt
        .query_map([course_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "username": r.get::<_, String>(1)?,
                "fullName": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let teacher_name = match conn
        .query_row(
            "SELECT username FROM users WHERE id = ?",
            [course.teacher_id],
            |r| r.get::<_, String>(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "course": course_json(&course, teacher_name.as_deref()),
            "assignments": assignments,
            "students": students,
            "availableStudents": available_students,
        }),
    )
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_role(state, req, &[Role::Teacher, Role::Admin]) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let schedule = opt_str(req, "schedule");

    // A course owner must hold the teacher role. Teachers own their own
    // courses; an admin has to name the owning teacher explicitly.
    let teacher_id = match session.role {
        Role::Teacher => session.user_id,
        _ => {
            let teacher_id = match required_i64(req, "teacherId") {
                Ok(v) => v,
                Err(e) => return e,
            };
            let role: Option<String> = match conn
                .query_row("SELECT role FROM users WHERE id = ?", [teacher_id], |r| {
                    r.get(0)
                })
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            match role.as_deref() {
                Some("teacher") => teacher_id,
                Some(_) => {
                    return err(
                        &req.id,
                        "validation_failed",
                        "Course owner must be a teacher.",
                        None,
                    )
                }
                None => return err(&req.id, "not_found", "Teacher not found.", None),
            }
        }
    };

    match conn.execute(
        "INSERT INTO courses (name, teacher_id, schedule) VALUES (?, ?, ?)",
        (&name, teacher_id, &schedule),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({ "courseId": conn.last_insert_rowid(), "message": "Course created!" }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn owner_or_admin(session_role: Role, session_user: i64, course: &CourseRow) -> bool {
    session_role == Role::Admin || course.teacher_id == session_user
}

fn handle_courses_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let schedule = opt_str(req, "schedule");

    let course = match course_by_id(conn, course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "Access denied.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !owner_or_admin(session.role, session.user_id, &course) {
        return err(&req.id, "forbidden", "Access denied.", None);
    }

    match conn.execute(
        "UPDATE courses SET name = ?, schedule = ? WHERE id = ?",
        (&name, &schedule, course_id),
    ) {
        Ok(_) => ok(&req.id, json!({ "message": "Course updated!" })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let course = match course_by_id(conn, course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "Access denied.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !owner_or_admin(session.role, session.user_id, &course) {
        return err(&req.id, "forbidden", "Access denied.", None);
    }

    // Row delete only; dependent enrollments/assignments follow the
    // manual-cascade policy and may be orphaned.
    match conn.execute("DELETE FROM courses WHERE id = ?", [course_id]) {
        Ok(_) => ok(&req.id, json!({ "message": "Course deleted." })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_courses_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let username = match required_str(req, "username") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match course_by_id(conn, course_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Course not found.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let student = match user_by_username(conn, &username) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student = match student {
        Some(s) if s.role == "student" => s,
        _ => return err(&req.id, "not_found", "Student not found.", None),
    };

    match conn.execute(
        "INSERT OR IGNORE INTO enrollments (student_id, course_id) VALUES (?, ?)",
        (student.id, course_id),
    ) {
        Ok(changed) => ok(
            &req.id,
            json!({
                "newEnrollment": changed > 0,
                "message": format!("{} enrolled!", username),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn ingest_attachment(
    state: &AppState,
    req: &Request,
) -> Result<Option<String>, serde_json::Value> {
    let Some(src) = opt_str(req, "attachmentPath") else {
        return Ok(None);
    };
    let Some(workspace) = state.workspace.as_ref() else {
        return Err(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    uploads::save_upload(
        Path::new(&src),
        &uploads::upload_dir(workspace),
        "",
        state.config.max_upload_bytes,
    )
    .map_err(|e| err(&req.id, "upload_failed", e.to_string(), None))
}

fn handle_assignments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let attachment = match ingest_attachment(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let description = opt_str(req, "description");
    let due_date = opt_str(req, "dueDate");

    match course_by_id(conn, course_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "Course not found.", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    match conn.execute(
        "INSERT INTO assignments (course_id, title, description, due_date, attachment_path, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        (course_id, &title, &description, &due_date, &attachment, db::now_ts()),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({
                "assignmentId": conn.last_insert_rowid(),
                "attachmentPath": attachment,
                "message": "Assignment posted!",
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_assignments_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    if session.role != Role::Student {
        return err(&req.id, "forbidden", "Permission denied.", None);
    }
    let attachment = match ingest_attachment(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_i64(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let content = opt_str(req, "content");

    let assignment: Option<String> = match conn
        .query_row(
            "SELECT title FROM assignments WHERE id = ? AND course_id = ?",
            (assignment_id, course_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(assignment_title) = assignment else {
        return err(&req.id, "not_found", "Assignment not found.", None);
    };
    let teacher_id: Option<i64> = match conn
        .query_row(
            "SELECT teacher_id FROM courses WHERE id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(teacher_id) = teacher_id else {
        return err(&req.id, "not_found", "Course not found.", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO submissions (assignment_id, student_id, content, attachment_path, submission_date)
         VALUES (?, ?, ?, ?, ?)",
        (assignment_id, session.user_id, &content, &attachment, db::now_ts()),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    let submission_id = tx.last_insert_rowid();
    if let Err(e) = add_notification(
        &tx,
        teacher_id,
        &format!(
            "New submission from {} for {}",
            session.username, assignment_title
        ),
        "info",
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({
            "submissionId": submission_id,
            "attachmentPath": attachment,
            "message": "Work submitted!",
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_courses_list(state, req)),
        "courses.search" => Some(handle_courses_search(state, req)),
        "courses.open" => Some(handle_courses_open(state, req)),
        "courses.create" => Some(handle_courses_create(state, req)),
        "courses.update" => Some(handle_courses_update(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        "courses.enroll" => Some(handle_courses_enroll(state, req)),
        "assignments.create" => Some(handle_assignments_create(state, req)),
        "assignments.submit" => Some(handle_assignments_submit(state, req)),
        _ => None,
    }
}
