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

#[test]
fn regrading_a_submission_updates_the_single_synced_grade_row() {
    let workspace = temp_dir("campusd-grading-sync");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = login(&mut stdin, &mut reader, "2", "admin", "admin123", "admin");
    let seeded = request_ok(&mut stdin, &mut reader, "3", "workspace.seedDemo", json!({}));
    let alice_id = seeded["students"]
        .as_array()
        .and_then(|s| s.iter().find(|u| u["username"] == json!("alice")))
        .and_then(|u| u["id"].as_i64())
        .expect("alice id");

    let _ = login(&mut stdin, &mut reader, "4", "mr_smith", "password", "teacher");
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.create",
        json!({ "name": "Grading 101", "schedule": "Tue 11:00 AM" }),
    );
    let course_id = course["courseId"].as_i64().expect("courseId");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "courses.enroll",
        json!({ "courseId": course_id, "username": "alice" }),
    );
    let assignment = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "assignments.create",
        json!({ "courseId": course_id, "title": "Essay 1", "dueDate": "2026-09-01" }),
    );
    let assignment_id = assignment["assignmentId"].as_i64().expect("assignmentId");

    let _ = login(&mut stdin, &mut reader, "8", "alice", "password", "student");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.submit",
        json!({
            "courseId": course_id,
            "assignmentId": assignment_id,
            "content": "My essay text."
        }),
    );

    let _ = login(&mut stdin, &mut reader, "10", "mr_smith", "password", "teacher");
    let submissions = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "submissions.list",
        json!({ "assignmentId": assignment_id }),
    );
    let submission_id = submissions["submissions"][0]["id"]
        .as_i64()
        .expect("submission id");

    // Out-of-range grade is rejected before any write.
    let too_big = request(
        &mut stdin,
        &mut reader,
        "12",
        "submissions.grade",
        json!({
            "assignmentId": assignment_id,
            "submissionId": submission_id,
            "grade": 101.0
        }),
    );
    assert_eq!(too_big["error"]["code"], json!("validation_failed"));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "submissions.grade",
        json!({
            "assignmentId": assignment_id,
            "submissionId": submission_id,
            "grade": 85.0,
            "feedback": "Solid first draft."
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "submissions.grade",
        json!({
            "assignmentId": assignment_id,
            "submissionId": submission_id,
            "grade": 92.0,
            "feedback": "Revised version is stronger."
        }),
    );

    // Exactly one synchronized grade row, carrying the latest score.
    let grades = request_ok(&mut stdin, &mut reader, "15", "grades.list", json!({}));
    let synced: Vec<&serde_json::Value> = grades["grades"]
        .as_array()
        .expect("grades")
        .iter()
        .filter(|g| g["gradeType"] == json!("Assignment: Essay 1"))
        .collect();
    assert_eq!(synced.len(), 1, "synced rows: {:?}", synced);
    assert_eq!(synced[0]["score"], json!(92.0));
    assert_eq!(synced[0]["studentName"], json!("alice"));

    // The student was notified about the grading.
    let _ = login(&mut stdin, &mut reader, "16", "alice", "password", "student");
    let dashboard = request_ok(&mut stdin, &mut reader, "17", "dashboard.open", json!({}));
    let notified = dashboard["notifications"]
        .as_array()
        .expect("notifications")
        .iter()
        .any(|n| {
            n["message"]
                .as_str()
                .map(|m| m.contains("'Essay 1' has been graded"))
                .unwrap_or(false)
        });
    assert!(notified, "notifications: {}", dashboard["notifications"]);

    // grades.add shares the same validation and is teacher-gated.
    let student_add = request(
        &mut stdin,
        &mut reader,
        "18",
        "grades.add",
        json!({ "studentId": alice_id, "courseId": course_id, "score": 55.0 }),
    );
    assert_eq!(student_add["error"]["code"], json!("forbidden"));

    let _ = login(&mut stdin, &mut reader, "19", "mr_smith", "password", "teacher");
    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "20",
        "grades.add",
        json!({ "studentId": alice_id, "courseId": course_id, "score": -1.0 }),
    );
    assert_eq!(out_of_range["error"]["code"], json!("validation_failed"));
}
