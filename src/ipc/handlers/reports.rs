use serde_json::json;
use std::path::PathBuf;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, require_role, required_i64, required_str};
use crate::ipc::types::{AppState, Request, Role};
use crate::report;

fn handle_report_card(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let institution = state.config.institution_name.clone();
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_i64(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_dir = match required_str(req, "outDir") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match report::write_report_card(conn, &institution, student_id, &out_dir) {
        Ok((path, file_name)) => ok(
            &req.id,
            json!({
                "path": path.to_string_lossy(),
                "fileName": file_name,
            }),
        ),
        Err(e) => err(&req.id, "report_failed", e.to_string(), None),
    }
}

fn handle_batch(state: &mut AppState, req: &Request) -> serde_json::Value {
    if let Err(e) = require_role(state, req, &[Role::Teacher, Role::Admin]) {
        return e;
    }
    let institution = state.config.institution_name.clone();
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let out_dir = match required_str(req, "outDir") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match report::write_batch_archive(conn, &institution, &out_dir) {
        Ok((path, summary)) => ok(
            &req.id,
            json!({
                "path": path.to_string_lossy(),
                "fileName": summary.file_name,
                "count": summary.count,
                "skipped": summary.skipped,
            }),
        ),
        Err(e) => err(&req.id, "report_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.reportCard" => Some(handle_report_card(state, req)),
        "reports.batch" => Some(handle_batch(state, req)),
        _ => None,
    }
}
