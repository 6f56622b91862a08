use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

/// Generated credentials only leave the daemon through the mail spool.
fn spooled_password(workspace: &Path, email: &str) -> String {
    let outbox = workspace.join("mail_outbox");
    for entry in std::fs::read_dir(&outbox).expect("read outbox") {
        let path = entry.expect("outbox entry").path();
        let text = std::fs::read_to_string(&path).expect("read spool file");
        let msg: serde_json::Value = serde_json::from_str(&text).expect("parse spool json");
        if msg["to"] != json!(email) {
            continue;
        }
        let body = msg["body"].as_str().expect("mail body");
        for line in body.lines() {
            if let Some(password) = line.trim().strip_prefix("Password: ") {
                return password.to_string();
            }
        }
    }
    panic!("no spooled credentials mail for {}", email);
}

fn card_value<'a>(stats: &'a serde_json::Value, label: &str) -> &'a serde_json::Value {
    stats
        .as_array()
        .expect("stats cards")
        .iter()
        .find(|c| c["label"] == json!(label))
        .unwrap_or_else(|| panic!("missing stats card {}", label))
        .get("value")
        .expect("card value")
}

#[test]
fn student_dashboard_gpa_attendance_and_sentinel() {
    let workspace = temp_dir("campusd-dashboard-student");
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
        json!({ "fullName": "Fresh Student", "email": "fresh@example.com" }),
    );
    let username = enrolled["username"].as_str().expect("username").to_string();
    let student_id = enrolled["userId"].as_i64().expect("userId");
    assert_eq!(enrolled["emailed"], json!(true));
    let password = spooled_password(&workspace, "fresh@example.com");

    // No grades, no attendance yet: zeroed summaries and the N/A sentinel.
    let _ = login(&mut stdin, &mut reader, "5", &username, &password, "student");
    let empty = request_ok(&mut stdin, &mut reader, "6", "dashboard.open", json!({}));
    assert_eq!(card_value(&empty["stats"], "Current GPA"), &json!("0.00 / 4.0"));
    assert_eq!(card_value(&empty["stats"], "Attendance Rate"), &json!("N/A"));
    assert_eq!(card_value(&empty["stats"], "Status"), &json!("Active"));
    assert_eq!(card_value(&empty["stats"], "Total Courses"), &json!(0));

    // Controlled data through a fresh course.
    let _ = login(&mut stdin, &mut reader, "7", "mr_smith", "password", "teacher");
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "courses.create",
        json!({ "name": "Calculus", "schedule": "Wed 10:00 AM" }),
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
        json!({ "studentId": student_id, "courseId": course_id, "score": 95.0, "gradeType": "Quiz" }),
    );
    for (rid, date, status) in [
        ("11", "2026-03-02", "Present"),
        ("12", "2026-03-04", "Present"),
        ("13", "2026-03-06", "Absent"),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "attendance.log",
            json!({
                "studentId": student_id,
                "courseId": course_id,
                "date": date,
                "status": status
            }),
        );
    }

    let _ = login(&mut stdin, &mut reader, "14", &username, &password, "student");
    let dashboard = request_ok(&mut stdin, &mut reader, "15", "dashboard.open", json!({}));
    assert_eq!(
        card_value(&dashboard["stats"], "Current GPA"),
        &json!("4.00 / 4.0")
    );
    assert_eq!(
        card_value(&dashboard["stats"], "Attendance Rate"),
        &json!("66%")
    );
    assert_eq!(
        card_value(&dashboard["stats"], "Status"),
        &json!("Academic Honor")
    );
    assert_eq!(card_value(&dashboard["stats"], "Total Courses"), &json!(1));
    assert_eq!(dashboard["chartData"]["attendanceValues"], json!([2, 1, 0]));
    assert_eq!(dashboard["chartData"]["gradeLabels"], json!(["Calculus"]));

    // Attendance validation guards status and date shape.
    let _ = login(&mut stdin, &mut reader, "16", "mr_smith", "password", "teacher");
    let bad_status = request(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.log",
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "date": "2026-03-08",
            "status": "OnTime"
        }),
    );
    assert_eq!(bad_status["error"]["code"], json!("validation_failed"));
    let bad_date = request(
        &mut stdin,
        &mut reader,
        "18",
        "attendance.log",
        json!({
            "studentId": student_id,
            "courseId": course_id,
            "date": "03/08/2026",
            "status": "Late"
        }),
    );
    assert_eq!(bad_date["error"]["code"], json!("validation_failed"));
}

#[test]
fn teacher_and_admin_dashboards_shape() {
    let workspace = temp_dir("campusd-dashboard-teacher");
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

    let admin_dash = request_ok(&mut stdin, &mut reader, "4", "dashboard.open", json!({}));
    assert_eq!(card_value(&admin_dash["stats"], "System"), &json!("Online"));
    // admin + sentinel + 3 teachers + 5 students
    assert_eq!(card_value(&admin_dash["stats"], "Users"), &json!(10));
    assert_eq!(card_value(&admin_dash["stats"], "Courses"), &json!(4));

    let _ = login(&mut stdin, &mut reader, "5", "ms_jones", "password", "teacher");
    let teacher_dash = request_ok(&mut stdin, &mut reader, "6", "dashboard.open", json!({}));
    let class_avg = card_value(&teacher_dash["stats"], "Class Average")
        .as_str()
        .expect("class average label")
        .to_string();
    assert!(class_avg.ends_with('%'), "got: {}", class_avg);
    assert_eq!(
        card_value(&teacher_dash["stats"], "Status"),
        &json!("Teacher Profile")
    );
}
