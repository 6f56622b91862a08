use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_campusd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn campusd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    username: &str,
    password: &str,
    role: &str,
) -> serde_json::Value {
    request_ok(
        stdin,
        reader,
        id,
        "auth.login",
        json!({ "username": username, "password": password, "role": role }),
    )
}

fn count(conn: &rusqlite::Connection, sql: &str, id: i64) -> i64 {
    conn.query_row(sql, [id], |r| r.get(0)).expect("count query")
}

#[test]
fn enroll_edit_delete_and_the_orphan_rows_it_leaves() {
    let workspace = temp_dir("campusd-admissions");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "admin", "admin123", "admin");
    let _ = request_ok(&mut stdin, &mut reader, "3", "workspace.seedDemo", json!({}));

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "admissions.enroll",
        json!({
            "fullName": "Dana Orphanage",
            "email": "dana@example.com",
            "mobile": "555-0100",
            "parentName": "Pat Orphanage"
        }),
    );
    let user_id = enrolled["userId"].as_i64().expect("userId");
    let username = enrolled["username"].as_str().expect("username").to_string();
    assert!(username.starts_with("danaorph"), "handle: {}", username);
    assert_eq!(
        enrolled["admissionNumber"],
        json!(format!("ADM{:04}", user_id))
    );
    assert_eq!(enrolled["emailed"], json!(true));

    let listed = request_ok(&mut stdin, &mut reader, "5", "admissions.list", json!({}));
    let row = listed["students"]
        .as_array()
        .and_then(|s| {
            s.iter()
                .find(|r| r["userId"] == json!(user_id))
                .cloned()
        })
        .expect("enrolled student listed");
    assert_eq!(row["fullName"], json!("Dana Orphanage"));
    assert_eq!(row["admissionNumber"], json!(format!("ADM{:04}", user_id)));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "admissions.update",
        json!({
            "userId": user_id,
            "fullName": "Dana O. Orphanage",
            "email": "dana@example.com",
            "mobile": "555-0199"
        }),
    );

    // Give the student dependent academic rows through normal channels.
    let _ = login(&mut stdin, &mut reader, "7", "mr_smith", "password", "teacher");
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "courses.create",
        json!({ "name": "Orphan Studies", "schedule": "Thu 3:00 PM" }),
    );
    let course_id = course["courseId"].as_i64().expect("courseId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "courses.enroll",
        json!({ "courseId": course_id, "username": username }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "grades.add",
        json!({ "studentId": user_id, "courseId": course_id, "score": 70.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.log",
        json!({
            "studentId": user_id,
            "courseId": course_id,
            "date": "2026-04-01",
            "status": "Present"
        }),
    );

    let _ = login(&mut stdin, &mut reader, "12", "admin", "admin123", "admin");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "admissions.delete",
        json!({ "userId": user_id }),
    );

    let listed_after = request_ok(&mut stdin, &mut reader, "14", "admissions.list", json!({}));
    assert!(
        !listed_after["students"]
            .as_array()
            .expect("students")
            .iter()
            .any(|r| r["userId"] == json!(user_id)),
        "deleted student still listed"
    );

    // Deletion cascades are manual: user, details and enrollments go,
    // while grade/attendance rows stay behind as orphans. This locks in
    // today's behavior for the future hardening pass.
    let conn = rusqlite::Connection::open(workspace.join("campus.sqlite3")).expect("open db");
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM users WHERE id = ?", user_id), 0);
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM student_details WHERE user_id = ?", user_id),
        0
    );
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM enrollments WHERE student_id = ?", user_id),
        0
    );
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM grades WHERE student_id = ?", user_id),
        1
    );
    assert_eq!(
        count(&conn, "SELECT COUNT(*) FROM attendance WHERE student_id = ?", user_id),
        1
    );
}

#[test]
fn enrollment_survives_mail_failure_as_a_warning() {
    let workspace = temp_dir("campusd-admissions-mailfail");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "admin", "admin123", "admin");

    // No '@' in the address: the sink refuses it, the enrollment stands.
    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "admissions.enroll",
        json!({ "fullName": "No Mailbox", "email": "not-an-address" }),
    );
    assert_eq!(enrolled["emailed"], json!(false));
    let message = enrolled["message"].as_str().expect("message");
    assert!(message.contains("email failed"), "got: {}", message);

    let listed = request_ok(&mut stdin, &mut reader, "4", "admissions.list", json!({}));
    assert!(listed["students"]
        .as_array()
        .expect("students")
        .iter()
        .any(|r| r["fullName"] == json!("No Mailbox")));
}
