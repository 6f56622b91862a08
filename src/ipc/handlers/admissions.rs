use rand::Rng;
use serde_json::json;

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, opt_str, require_role, required_i64, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::mail;
use crate::passwd;

fn admission_number(user_id: i64) -> String {
    format!("ADM{:04}", user_id)
}

/// Handle = first eight name characters (lowercased, whitespace stripped)
/// plus four random digits; password = ten random alphanumerics.
fn generate_credentials(full_name: &str) -> (String, String) {
    let mut rng = rand::thread_rng();

    let base: String = full_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .take(8)
        .collect();
    let suffix: String = (0..4).map(|_| char::from(b'0' + rng.gen_range(0..10))).collect();
    let username = format!("{}{}", base, suffix);

    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let password: String = (0..10)
        .map(|_| char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
        .collect();

    (username, password)
}

fn handle_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mobile = opt_str(req, "mobile");
    let dob = opt_str(req, "dob");
    let gender = opt_str(req, "gender");
    let address = opt_str(req, "address");
    let parent_name = opt_str(req, "parentName");
    let parent_mobile = opt_str(req, "parentMobile");
    let parent_email = opt_str(req, "parentEmail");

    if full_name.trim().is_empty() {
        return err(&req.id, "validation_failed", "Full name is required.", None);
    }

    let (username, password) = generate_credentials(&full_name);
    let hashed = passwd::hash_password(&password);

    // User + details land together or not at all.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    if let Err(e) = tx.execute(
        "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, 'student', ?)",
        (&username, &hashed, db::now_ts()),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_tx_failed",
            format!("Error enrolling student: {}", e),
            None,
        );
    }
    let user_id = tx.last_insert_rowid();
    let admission = admission_number(user_id);
    if let Err(e) = tx.execute(
        "INSERT INTO student_details
         (user_id, full_name, email, mobile, dob, gender, address,
          parent_name, parent_mobile, parent_email, admission_number)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            user_id,
            &full_name,
            &email,
            &mobile,
            &dob,
            &gender,
            &address,
            &parent_name,
            &parent_mobile,
            &parent_email,
            &admission,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_tx_failed",
            format!("Error enrolling student: {}", e),
            None,
        );
    }
    if let Err(e) = tx.commit() {
        return err(
            &req.id,
            "db_tx_failed",
            format!("Error enrolling student: {}", e),
            None,
        );
    }

    // Credentials mail is best-effort: a delivery failure downgrades the
    // flash to a warning but the enrollment stands.
    let msg = mail::credentials_message(
        &state.config.mail_sender,
        &full_name,
        &email,
        &username,
        &password,
        &admission,
    );
    let (emailed, message) = match mail::deliver(&workspace, &msg) {
        Ok(_) => (
            true,
            format!("Student enrolled successfully! Credentials sent to {}.", email),
        ),
        Err(e) => {
            tracing::warn!(error = %e, recipient = %email, "credentials mail failed");
            (false, format!("Student enrolled, but email failed: {}", e))
        }
    };

    ok(
        &req.id,
        json!({
            "userId": user_id,
            "username": username,
            "admissionNumber": admission,
            "emailed": emailed,
            "message": message,
        }),
    )
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT u.id, u.username, sd.full_name, sd.email, sd.mobile,
                sd.dob, sd.gender, sd.address, sd.parent_name, sd.parent_mobile,
                sd.parent_email, sd.admission_number,
                (SELECT GROUP_CONCAT(c.name, ', ') FROM enrollments e
                 JOIN courses c ON e.course_id = c.id
                 WHERE e.student_id = u.id) AS courses
         FROM users u
         LEFT JOIN student_details sd ON u.id = sd.user_id
         WHERE u.role = 'student'
         ORDER BY courses ASC, sd.full_name ASC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([], |r| {
            Ok(json!({
                "userId": r.get::<_, i64>(0)?,
                "username": r.get::<_, String>(1)?,
                "fullName": r.get::<_, Option<String>>(2)?,
                "email": r.get::<_, Option<String>>(3)?,
                "mobile": r.get::<_, Option<String>>(4)?,
                "dob": r.get::<_, Option<String>>(5)?,
                "gender": r.get::<_, Option<String>>(6)?,
                "address": r.get::<_, Option<String>>(7)?,
                "parentName": r.get::<_, Option<String>>(8)?,
                "parentMobile": r.get::<_, Option<String>>(9)?,
                "parentEmail": r.get::<_, Option<String>>(10)?,
                "admissionNumber": r.get::<_, Option<String>>(11)?,
                "courses": r.get::<_, Option<String>>(12)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "students": students }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_i64(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Details only; the handle, role and admission number are immutable.
    match conn.execute(
        "UPDATE student_details SET
             full_name = ?, email = ?, mobile = ?, dob = ?,
             gender = ?, address = ?, parent_name = ?,
             parent_mobile = ?, parent_email = ?
         WHERE user_id = ?",
        (
            &opt_str(req, "fullName"),
            &opt_str(req, "email"),
            &opt_str(req, "mobile"),
            &opt_str(req, "dob"),
            &opt_str(req, "gender"),
            &opt_str(req, "address"),
            &opt_str(req, "parentName"),
            &opt_str(req, "parentMobile"),
            &opt_str(req, "parentEmail"),
            user_id,
        ),
    ) {
        Ok(0) => err(&req.id, "not_found", "Student not found.", None),
        Ok(_) => ok(&req.id, json!({ "message": "Student details updated!" })),
        Err(e) => err(
            &req.id,
            "db_query_failed",
            format!("Error updating student: {}", e),
            None,
        ),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_i64(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Manual cascade: user, details and enrollments only. Grades,
    // attendance and submissions are left behind as orphans.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    for sql in [
        "DELETE FROM student_details WHERE user_id = ?",
        "DELETE FROM users WHERE id = ?",
        "DELETE FROM enrollments WHERE student_id = ?",
    ] {
        if let Err(e) = tx.execute(sql, [user_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_tx_failed",
                format!("Error deleting student: {}", e),
                None,
            );
        }
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_tx_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "message": "Student account deleted successfully." }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admissions.enroll" => Some(handle_enroll(state, req)),
        "admissions.list" => Some(handle_list(state, req)),
        "admissions.update" => Some(handle_update(state, req)),
        "admissions.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
