use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    add_notification, db_conn, opt_bool, opt_str, require_role, require_session, required_f64,
    required_i64, required_str,
};
use crate::ipc::types::{AppState, Request, Role};

const ATTENDANCE_STATUSES: [&str; 3] = ["Present", "Absent", "Late"];

fn score_in_range(value: f64) -> bool {
    (0.0..=100.0).contains(&value)
}

fn handle_grades_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score = match required_f64(req, "score") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_type = opt_str(req, "gradeType");

    if !score_in_range(score) {
        return err(
            &req.id,
            "validation_failed",
            "Score must be between 0 and 100.",
            None,
        );
    }
    let student_exists: Option<i64> = match conn
        .query_row(
            "SELECT id FROM users WHERE id = ? AND role = 'student'",
            [student_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "not_found", "Student not found.", None);
    }
    let course_exists: Option<i64> = match conn
        .query_row("SELECT id FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if course_exists.is_none() {
        return err(&req.id, "not_found", "Course not found.", None);
    }

    match conn.execute(
        "INSERT INTO grades (student_id, course_id, score, grade_type, created_at)
         VALUES (?, ?, ?, ?, ?)",
        (student_id, course_id, score, &grade_type, db::now_ts()),
    ) {
        Ok(_) => ok(
            &req.id,
            json!({
                "gradeId": conn.last_insert_rowid(),
                "message": "Grade added!",
                // Shell hint: mirror the form's optional jump back to the course view.
                "redirectToCourse": opt_bool(req, "redirectToCourse").then_some(course_id),
            }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let result = if session.role == Role::Student {
        let mut stmt = match conn.prepare(
            "SELECT g.id, g.course_id, c.name, g.score, g.grade_type, g.created_at
             FROM grades g JOIN courses c ON g.course_id = c.id
             WHERE g.student_id = ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([session.user_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "courseId": r.get::<_, i64>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "score": r.get::<_, f64>(3)?,
                "gradeType": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT g.id, g.course_id, c.name, u.username, g.score, g.grade_type, g.created_at
             FROM grades g
             JOIN users u ON g.student_id = u.id
             JOIN courses c ON g.course_id = c.id
             WHERE c.teacher_id = ?",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([session.user_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "courseId": r.get::<_, i64>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "studentName": r.get::<_, String>(3)?,
                "score": r.get::<_, f64>(4)?,
                "gradeType": r.get::<_, Option<String>>(5)?,
                "createdAt": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match result {
        Ok(grades) => ok(&req.id, json!({ "grades": grades })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_attendance_log(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let course_id = match required_i64(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_str(req, "date") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if NaiveDate::parse_from_str(&date, "%Y-%m-%d").is_err() {
        return err(
            &req.id,
            "validation_failed",
            "date must be YYYY-MM-DD",
            None,
        );
    }
    if !ATTENDANCE_STATUSES.contains(&status.as_str()) {
        return err(
            &req.id,
            "validation_failed",
            "status must be one of: Present, Absent, Late",
            None,
        );
    }

    match conn.execute(
        "INSERT INTO attendance (student_id, course_id, date, status) VALUES (?, ?, ?, ?)",
        (student_id, course_id, &date, &status),
    ) {
        Ok(_) => ok(&req.id, json!({ "message": "Log updated!" })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_session(state, req) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let result = if session.role == Role::Student {
        let mut stmt = match conn.prepare(
            "SELECT a.id, a.course_id, c.name, a.date, a.status
             FROM attendance a JOIN courses c ON a.course_id = c.id
             WHERE a.student_id = ? ORDER BY a.date DESC",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([session.user_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "courseId": r.get::<_, i64>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "date": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    } else {
        let mut stmt = match conn.prepare(
            "SELECT a.id, a.course_id, c.name, u.username, a.date, a.status
             FROM attendance a
             JOIN users u ON a.student_id = u.id
             JOIN courses c ON a.course_id = c.id
             WHERE c.teacher_id = ? ORDER BY a.date DESC",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        stmt.query_map([session.user_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "courseId": r.get::<_, i64>(1)?,
                "courseName": r.get::<_, String>(2)?,
                "studentName": r.get::<_, String>(3)?,
                "date": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    };

    match result {
        Ok(logs) => ok(&req.id, json!({ "attendance": logs })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_i64(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let assignment: Option<(String, i64)> = match conn
        .query_row(
            "SELECT title, course_id FROM assignments WHERE id = ?",
            [assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((title, course_id)) = assignment else {
        return err(&req.id, "not_found", "Assignment not found.", None);
    };

    let course_name: Option<String> = match conn
        .query_row("SELECT name FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.student_id, u.username, s.content, s.attachment_path,
                s.submission_date, s.grade, s.feedback
         FROM submissions s JOIN users u ON s.student_id = u.id
         WHERE s.assignment_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let submissions = match stmt
        .query_map([assignment_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "studentId": r.get::<_, i64>(1)?,
                "studentName": r.get::<_, String>(2)?,
                "content": r.get::<_, Option<String>>(3)?,
                "attachmentPath": r.get::<_, Option<String>>(4)?,
                "submissionDate": r.get::<_, Option<String>>(5)?,
                "grade": r.get::<_, Option<f64>>(6)?,
                "feedback": r.get::<_, Option<String>>(7)?,
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
            "assignment": { "id": assignment_id, "title": title, "courseId": course_id },
            "courseName": course_name,
            "submissions": submissions,
        }),
    )
}

fn handle_submissions_grade(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let assignment_id = match required_i64(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let submission_id = match required_i64(req, "submissionId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = match required_f64(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let feedback = opt_str(req, "feedback");

    if !score_in_range(grade) {
        return err(
            &req.id,
            "validation_failed",
            "Grade must be between 0 and 100.",
            None,
        );
    }

    let submission: Option<i64> = match conn
        .query_row(
            "SELECT student_id FROM submissions WHERE id = ? AND assignment_id = ?",
            (submission_id, assignment_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(student_id) = submission else {
        return err(&req.id, "not_found", "Submission not found.", None);
    };
    let assignment: Option<(String, i64)> = match conn
        .query_row(
            "SELECT title, course_id FROM assignments WHERE id = ?",
            [assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((title, course_id)) = assignment else {
        return err(&req.id, "not_found", "Assignment not found.", None);
    };

    // One synchronized grade row per (student, course, assignment label);
    // re-grading updates it in place.
    let grade_type = format!("Assignment: {}", title);

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "UPDATE submissions SET grade = ?, feedback = ? WHERE id = ?",
        (grade, &feedback, submission_id),
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    let existing: Option<i64> = match tx
        .query_row(
            "SELECT id FROM grades WHERE student_id = ? AND course_id = ? AND grade_type = ?",
            (student_id, course_id, &grade_type),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    let grade_write = match existing {
        Some(grade_id) => tx.execute("UPDATE grades SET score = ? WHERE id = ?", (grade, grade_id)),
        None => tx.execute(
            "INSERT INTO grades (student_id, course_id, score, grade_type, created_at)
             VALUES (?, ?, ?, ?, ?)",
            (student_id, course_id, grade, &grade_type, db::now_ts()),
        ),
    };
    if let Err(e) = grade_write {
        let _ = tx.rollback();
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    if let Err(e) = add_notification(
        &tx,
        student_id,
        &format!("Your work for '{}' has been graded: {}%", title, grade),
        "success",
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "message": "Grade assigned and student notified!" }),
    )
}

fn handle_remarks_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = match require_role(state, req, &[Role::Teacher, Role::Admin]) {
        Ok(s) => s.clone(),
        Err(e) => return e,
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let term = opt_str(req, "term").unwrap_or_else(|| "Term 1".to_string());
    let remarks = opt_str(req, "remarks");
    let improvement = opt_str(req, "improvementAreas");

    // Upsert per (student, term); concurrent writers are last-write-wins.
    let existing: Option<i64> = match conn
        .query_row(
            "SELECT id FROM remarks WHERE student_id = ? AND term = ?",
            (student_id, &term),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let write = match existing {
        Some(remark_id) => conn.execute(
            "UPDATE remarks SET remarks = ?, improvement_areas = ? WHERE id = ?",
            (&remarks, &improvement, remark_id),
        ),
        None => conn.execute(
            "INSERT INTO remarks (student_id, teacher_id, term, remarks, improvement_areas, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            (
                student_id,
                session.user_id,
                &term,
                &remarks,
                &improvement,
                db::now_ts(),
            ),
        ),
    };

    match write {
        Ok(_) => ok(
            &req.id,
            json!({ "message": "Performance evaluation updated!" }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_remarks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, teacher_id, term, remarks, improvement_areas, created_at
         FROM remarks WHERE student_id = ? ORDER BY created_at DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let remarks = match stmt
        .query_map([student_id], |r| {
            Ok(json!({
                "id": r.get::<_, i64>(0)?,
                "teacherId": r.get::<_, i64>(1)?,
                "term": r.get::<_, String>(2)?,
                "remarks": r.get::<_, Option<String>>(3)?,
                "improvementAreas": r.get::<_, Option<String>>(4)?,
                "createdAt": r.get::<_, Option<String>>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "remarks": remarks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.add" => Some(handle_grades_add(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "attendance.log" => Some(handle_attendance_log(state, req)),
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        "submissions.grade" => Some(handle_submissions_grade(state, req)),
        "remarks.save" => Some(handle_remarks_save(state, req)),
        "remarks.list" => Some(handle_remarks_list(state, req)),
        _ => None,
    }
}
