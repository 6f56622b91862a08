use anyhow::Context;
use chrono::Local;
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Line, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Point, Rgb,
};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::calc;

pub const BATCH_ARCHIVE_NAME: &str = "PTM_Batch_Reports.zip";

const PAGE_W: f64 = 210.0;
const PAGE_H: f64 = 297.0;
const MARGIN: f64 = 18.0;
const BOTTOM: f64 = 20.0;

const DEFAULT_REMARKS: &str = "No remarks provided.";
const DEFAULT_IMPROVEMENT: &str = "Continue pushing for excellence.";

#[derive(Debug, Clone)]
pub struct GradeLine {
    pub course_name: String,
    pub avg_score: f64,
}

/// Everything the renderer needs for one document.
#[derive(Debug, Clone)]
pub struct ReportCardModel {
    pub institution: String,
    pub student_name: String,
    pub role_label: String,
    pub term: String,
    pub generated: String,
    pub grades: Vec<GradeLine>,
    pub attendance: calc::AttendanceCounts,
    pub remarks: String,
    pub improvement_areas: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedReport {
    pub username: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub file_name: String,
    pub count: usize,
    pub skipped: Vec<SkippedReport>,
}

pub fn report_file_name(username: &str) -> String {
    format!("Report_Card_{}.pdf", username)
}

fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub fn build_report_model(
    conn: &Connection,
    institution: &str,
    student_id: i64,
) -> anyhow::Result<ReportCardModel> {
    let (username, role): (String, String) = conn
        .query_row(
            "SELECT username, role FROM users WHERE id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| anyhow::anyhow!("student not found: {}", student_id))?;

    let grades = calc::student_course_averages(conn, student_id)
        .map_err(|e| anyhow::anyhow!("{}", e.message))?
        .into_iter()
        .map(|c| GradeLine {
            course_name: c.name,
            avg_score: c.avg_score,
        })
        .collect();

    let attendance = calc::student_attendance_counts(conn, student_id)
        .map_err(|e| anyhow::anyhow!("{}", e.message))?;

    let remark_row: Option<(Option<String>, Option<String>, String)> = conn
        .query_row(
            "SELECT remarks, improvement_areas, term FROM remarks
             WHERE student_id = ? ORDER BY created_at DESC",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;

    let (remarks, improvement_areas, term) = match remark_row {
        Some((r, i, term)) => (
            r.filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_REMARKS.to_string()),
            i.filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_IMPROVEMENT.to_string()),
            term,
        ),
        None => (
            DEFAULT_REMARKS.to_string(),
            DEFAULT_IMPROVEMENT.to_string(),
            "Annual".to_string(),
        ),
    };

    Ok(ReportCardModel {
        institution: institution.to_string(),
        student_name: username,
        role_label: title_case(&role),
        term,
        generated: Local::now().format("%b %Y").to_string(),
        grades,
        attendance,
        remarks,
        improvement_areas,
    })
}

/// Rough Helvetica advance; close enough for centering and wrapping.
fn text_width_mm(text: &str, font_size: f64) -> f64 {
    text.chars().count() as f64 * font_size * 0.5 * 0.352_778
}

fn wrap_text(text: &str, font_size: f64, max_mm: f64) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", current, word)
        };
        if text_width_mm(&candidate, font_size) > max_mm && !current.is_empty() {
            lines.push(current);
            current = word.to_string();
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    y: f64,
}

impl<'a> PageWriter<'a> {
    fn ensure_room(&mut self, needed: f64) {
        if self.y - needed < BOTTOM {
            let (page, layer) = self.doc.add_page(Mm(PAGE_W as f32), Mm(PAGE_H as f32), "Page");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y = PAGE_H - MARGIN;
        }
    }

    fn set_text_color(&self, r: f64, g: f64, b: f64) {
        self.layer
            .set_fill_color(Color::Rgb(Rgb::new(r as f32, g as f32, b as f32, None)));
    }

    fn text(&self, content: &str, size: f64, x: f64, bold: bool) {
        let font = if bold { &self.bold } else { &self.regular };
        self.layer
            .use_text(content, size as f32, Mm(x as f32), Mm(self.y as f32), font);
    }

    fn text_centered(&self, content: &str, size: f64, bold: bool) {
        let x = (PAGE_W - text_width_mm(content, size)).max(MARGIN) / 2.0;
        self.text(content, size, x, bold);
    }

    fn hline(&self, x0: f64, x1: f64, y: f64) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x0 as f32), Mm(y as f32)), false),
                (Point::new(Mm(x1 as f32), Mm(y as f32)), false),
            ],
            is_closed: false,
        });
    }

    fn vline(&self, x: f64, y0: f64, y1: f64) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x as f32), Mm(y0 as f32)), false),
                (Point::new(Mm(x as f32), Mm(y1 as f32)), false),
            ],
            is_closed: false,
        });
    }

    fn boxed(&self, x0: f64, y0: f64, x1: f64, y1: f64) {
        self.layer.add_line(Line {
            points: vec![
                (Point::new(Mm(x0 as f32), Mm(y0 as f32)), false),
                (Point::new(Mm(x1 as f32), Mm(y0 as f32)), false),
                (Point::new(Mm(x1 as f32), Mm(y1 as f32)), false),
                (Point::new(Mm(x0 as f32), Mm(y1 as f32)), false),
            ],
            is_closed: true,
        });
    }

    fn advance(&mut self, mm: f64) {
        self.y -= mm;
    }
}

/// Fixed-layout A4 report card: title block, student/term info, grade table
/// with Pass/Fail, attendance line, remarks box, signature footer.
pub fn render_report_card(model: &ReportCardModel) -> anyhow::Result<Vec<u8>> {
    let (doc, page, layer) = PdfDocument::new(
        format!("Report Card - {}", model.student_name),
        Mm(PAGE_W as f32),
        Mm(PAGE_H as f32),
        "Page",
    );
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .context("load built-in font")?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .context("load built-in bold font")?;

    let mut w = PageWriter {
        doc: &doc,
        layer: doc.get_page(page).get_layer(layer),
        regular,
        bold,
        y: PAGE_H - MARGIN - 8.0,
    };

    // Title block
    w.set_text_color(0.31, 0.275, 0.898);
    w.text_centered(&model.institution, 22.0, true);
    w.advance(10.0);
    w.set_text_color(0.0, 0.0, 0.0);
    w.text_centered("Official Academic Report Card", 13.0, true);
    w.advance(14.0);

    // Student / term info
    let label_x = MARGIN;
    let value_x = MARGIN + 34.0;
    let label2_x = 118.0;
    let value2_x = 148.0;
    w.set_text_color(0.45, 0.45, 0.45);
    w.text("Student Name:", 10.0, label_x, true);
    w.text("Role:", 10.0, label2_x, true);
    w.set_text_color(0.0, 0.0, 0.0);
    w.text(&model.student_name, 10.0, value_x, true);
    w.text(&model.role_label, 10.0, value2_x, true);
    w.advance(7.0);
    w.set_text_color(0.45, 0.45, 0.45);
    w.text("Report Term:", 10.0, label_x, true);
    w.text("Date Generated:", 10.0, label2_x, true);
    w.set_text_color(0.0, 0.0, 0.0);
    w.text(&model.term, 10.0, value_x, true);
    w.text(&model.generated, 10.0, value2_x, true);
    w.advance(14.0);

    // Grade table
    w.text("Academic Performance", 12.0, MARGIN, true);
    w.advance(8.0);

    let col0 = MARGIN;
    let col1 = 108.0;
    let col2 = 158.0;
    let col_end = PAGE_W - MARGIN;
    let row_h = 8.0;

    w.layer
        .set_outline_color(Color::Rgb(Rgb::new(0.45, 0.45, 0.45, None)));
    w.layer.set_outline_thickness(0.4);

    let draw_row = |w: &mut PageWriter<'_>, cells: [&str; 3], bold: bool| {
        let top = w.y + row_h - 2.5;
        w.hline(col0, col_end, top);
        w.hline(col0, col_end, top - row_h);
        w.vline(col0, top, top - row_h);
        w.vline(col1, top, top - row_h);
        w.vline(col2, top, top - row_h);
        w.vline(col_end, top, top - row_h);
        w.text(cells[0], 10.0, col0 + 2.5, bold);
        w.text(cells[1], 10.0, col1 + 2.5, bold);
        w.text(cells[2], 10.0, col2 + 2.5, bold);
        w.advance(row_h);
    };

    draw_row(&mut w, ["Course Name", "Subject Mastery", "Status"], true);
    for line in &model.grades {
        w.ensure_room(row_h + 2.0);
        let mastery = format!("{:.1}%", line.avg_score);
        draw_row(
            &mut w,
            [
                line.course_name.as_str(),
                mastery.as_str(),
                calc::pass_fail(line.avg_score),
            ],
            false,
        );
    }
    if model.grades.is_empty() {
        draw_row(&mut w, ["No graded courses", "-", "-"], false);
    }
    w.advance(10.0);

    // Attendance
    w.ensure_room(30.0);
    w.text("Operational Metrics", 12.0, MARGIN, true);
    w.advance(8.0);
    w.text("Attendance Rate:", 10.0, MARGIN, true);
    w.text(&model.attendance.rate_label(), 10.0, MARGIN + 34.0, false);
    w.text("Total Sessions:", 10.0, label2_x, true);
    w.text(
        &model.attendance.total().to_string(),
        10.0,
        value2_x,
        false,
    );
    w.advance(14.0);

    // Remarks box
    let remark_lines = wrap_text(&model.remarks, 10.0, PAGE_W - 2.0 * MARGIN - 12.0);
    let improve_lines = wrap_text(&model.improvement_areas, 10.0, PAGE_W - 2.0 * MARGIN - 12.0);
    let box_h = 22.0 + 5.0 * (remark_lines.len() + improve_lines.len()) as f64;
    w.ensure_room(box_h + 12.0);
    w.text("Teacher Evaluation & Remarks", 12.0, MARGIN, true);
    w.advance(6.0);
    let box_top = w.y;
    w.advance(7.0);
    w.text("General Remarks:", 10.0, MARGIN + 5.0, true);
    w.advance(5.5);
    for line in &remark_lines {
        w.text(line, 10.0, MARGIN + 5.0, false);
        w.advance(5.0);
    }
    w.advance(2.0);
    w.text("Areas for Improvement:", 10.0, MARGIN + 5.0, true);
    w.advance(5.5);
    for line in &improve_lines {
        w.text(line, 10.0, MARGIN + 5.0, false);
        w.advance(5.0);
    }
    let box_bottom = w.y;
    w.boxed(MARGIN, box_bottom, PAGE_W - MARGIN, box_top + 4.0);
    w.advance(20.0);

    // Signature footer
    w.ensure_room(14.0);
    w.text("__________________________", 10.0, MARGIN, false);
    w.advance(6.0);
    w.text("Dean of Academics Signature", 10.0, MARGIN, false);

    drop(w);
    doc.save_to_bytes().context("serialize report card pdf")
}

/// Renders one student's report card into `out_dir`.
pub fn write_report_card(
    conn: &Connection,
    institution: &str,
    student_id: i64,
    out_dir: &Path,
) -> anyhow::Result<(PathBuf, String)> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;
    let model = build_report_model(conn, institution, student_id)?;
    let bytes = render_report_card(&model)?;
    let file_name = report_file_name(&model.student_name);
    let path = out_dir.join(&file_name);
    let mut f = File::create(&path)
        .with_context(|| format!("failed to create {}", path.to_string_lossy()))?;
    f.write_all(&bytes)?;
    Ok((path, file_name))
}

/// One report card per enrolled student, bundled into a zip archive.
/// A student whose document fails to build is skipped and reported;
/// the batch itself never aborts.
pub fn write_batch_archive(
    conn: &Connection,
    institution: &str,
    out_dir: &Path,
) -> anyhow::Result<(PathBuf, BatchSummary)> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create directory {}", out_dir.to_string_lossy()))?;

    let mut stmt = conn.prepare(
        "SELECT id, username FROM users WHERE role = 'student' ORDER BY id",
    )?;
    let students = stmt
        .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let out_path = out_dir.join(BATCH_ARCHIVE_NAME);
    let out_file = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.to_string_lossy()))?;
    let mut archive = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut count = 0usize;
    let mut skipped = Vec::new();
    for (student_id, username) in students {
        let bytes = build_report_model(conn, institution, student_id)
            .and_then(|model| render_report_card(&model));
        match bytes {
            Ok(bytes) => {
                archive
                    .start_file(report_file_name(&username), opts)
                    .context("failed to start archive entry")?;
                archive
                    .write_all(&bytes)
                    .context("failed to write archive entry")?;
                count += 1;
            }
            Err(e) => {
                tracing::warn!(student = %username, error = %e, "skipping report card in batch");
                skipped.push(SkippedReport {
                    username,
                    error: e.to_string(),
                });
            }
        }
    }

    archive.finish().context("failed to finalize archive")?;

    Ok((
        out_path,
        BatchSummary {
            file_name: BATCH_ARCHIVE_NAME.to_string(),
            count,
            skipped,
        },
    ))
}
