use serde_json::json;
use std::io::{BufRead, BufReader, Read, Write};
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

#[test]
fn batch_archive_holds_one_named_report_per_student() {
    let workspace = temp_dir("campusd-report-batch");
    let out_dir = temp_dir("campusd-report-batch-out");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "admin", "password": "admin123", "role": "admin" }),
    );

    let mut usernames = Vec::new();
    for (i, name) in [("3", "Batch One"), ("4", "Batch Two"), ("5", "Batch Three")] {
        let enrolled = request_ok(
            &mut stdin,
            &mut reader,
            i,
            "admissions.enroll",
            json!({
                "fullName": name,
                "email": format!("{}@example.com", name.replace(' ', ".").to_lowercase())
            }),
        );
        usernames.push(enrolled["username"].as_str().expect("username").to_string());
    }

    let batch = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "reports.batch",
        json!({ "outDir": out_dir.to_string_lossy() }),
    );
    assert_eq!(batch["count"], json!(3));
    assert_eq!(batch["fileName"], json!("PTM_Batch_Reports.zip"));
    assert_eq!(batch["skipped"].as_array().map(|s| s.len()), Some(0));

    let archive_path = out_dir.join("PTM_Batch_Reports.zip");
    let file = std::fs::File::open(&archive_path).expect("open archive");
    let mut archive = zip::ZipArchive::new(file).expect("read archive");
    assert_eq!(archive.len(), 3);
    for username in &usernames {
        let entry_name = format!("Report_Card_{}.pdf", username);
        let mut entry = archive.by_name(&entry_name).expect("archive entry");
        let mut head = [0u8; 4];
        entry.read_exact(&mut head).expect("read entry head");
        assert_eq!(&head, b"%PDF", "entry {} is not a pdf", entry_name);
    }
}

#[test]
fn single_report_card_lands_on_disk_with_the_handle_pattern() {
    let workspace = temp_dir("campusd-report-single");
    let out_dir = temp_dir("campusd-report-single-out");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "username": "admin", "password": "admin123", "role": "admin" }),
    );
    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "admissions.enroll",
        json!({ "fullName": "Solo Report", "email": "solo@example.com" }),
    );
    let username = enrolled["username"].as_str().expect("username").to_string();
    let student_id = enrolled["userId"].as_i64().expect("userId");

    let written = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "reports.reportCard",
        json!({ "studentId": student_id, "outDir": out_dir.to_string_lossy() }),
    );
    assert_eq!(
        written["fileName"],
        json!(format!("Report_Card_{}.pdf", username))
    );
    let bytes = std::fs::read(out_dir.join(format!("Report_Card_{}.pdf", username)))
        .expect("read report pdf");
    assert!(bytes.starts_with(b"%PDF"));

    // Reports are teacher/admin only.
    let _ = request_ok(&mut stdin, &mut reader, "5", "auth.logout", json!({}));
    let gated = request(
        &mut stdin,
        &mut reader,
        "6",
        "reports.reportCard",
        json!({ "studentId": student_id, "outDir": out_dir.to_string_lossy() }),
    );
    assert_eq!(gated["error"]["code"], json!("unauthorized"));
}
