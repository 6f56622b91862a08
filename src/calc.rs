use rusqlite::Connection;
use serde::Serialize;

/// Score below which a course average reports as Fail on report cards.
pub const PASS_MARK: f64 = 50.0;

/// Fixed score-to-grade-point thresholds.
pub fn grade_point(score: f64) -> f64 {
    if score >= 90.0 {
        4.0
    } else if score >= 80.0 {
        3.0
    } else if score >= 70.0 {
        2.0
    } else if score >= 60.0 {
        1.0
    } else {
        0.0
    }
}

pub fn round_1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn pass_fail(avg_score: f64) -> &'static str {
    if avg_score >= PASS_MARK {
        "Pass"
    } else {
        "Fail"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

fn query_failed(e: rusqlite::Error) -> CalcError {
    CalcError::new("db_query_failed", e.to_string())
}

/// Per-course average score for one student or one teacher's roster.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseAverage {
    pub course_id: i64,
    pub name: String,
    pub avg_score: f64,
}

pub fn student_course_averages(
    conn: &Connection,
    student_id: i64,
) -> Result<Vec<CourseAverage>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, AVG(g.score)
             FROM grades g JOIN courses c ON g.course_id = c.id
             WHERE g.student_id = ?
             GROUP BY c.id",
        )
        .map_err(query_failed)?;
    stmt.query_map([student_id], |r| {
        Ok(CourseAverage {
            course_id: r.get(0)?,
            name: r.get(1)?,
            avg_score: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

pub fn teacher_course_averages(
    conn: &Connection,
    teacher_id: i64,
) -> Result<Vec<CourseAverage>, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.name, AVG(g.score)
             FROM grades g JOIN courses c ON g.course_id = c.id
             WHERE c.teacher_id = ?
             GROUP BY c.id",
        )
        .map_err(query_failed)?;
    stmt.query_map([teacher_id], |r| {
        Ok(CourseAverage {
            course_id: r.get(0)?,
            name: r.get(1)?,
            avg_score: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(query_failed)
}

/// Cumulative GPA: mean of per-course grade points, two decimals.
/// A student with no graded courses reports 0.0.
pub fn cumulative_gpa(averages: &[CourseAverage]) -> f64 {
    if averages.is_empty() {
        return 0.0;
    }
    let total: f64 = averages.iter().map(|c| grade_point(c.avg_score)).sum();
    round_2(total / averages.len() as f64)
}

/// Class average across a teacher's graded courses, one decimal.
/// None when the teacher has no graded courses.
pub fn class_average(averages: &[CourseAverage]) -> Option<f64> {
    if averages.is_empty() {
        return None;
    }
    let total: f64 = averages.iter().map(|c| c.avg_score).sum();
    Some(round_1(total / averages.len() as f64))
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceCounts {
    pub present: i64,
    pub absent: i64,
    pub late: i64,
}

impl AttendanceCounts {
    pub fn total(&self) -> i64 {
        self.present + self.absent + self.late
    }

    pub fn rate_percent(&self) -> Option<i64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some((self.present as f64 / total as f64 * 100.0) as i64)
    }

    /// Integer-percent label; "N/A" is the sentinel for zero logged
    /// sessions at every call site.
    pub fn rate_label(&self) -> String {
        match self.rate_percent() {
            Some(p) => format!("{}%", p),
            None => "N/A".to_string(),
        }
    }
}

fn counts_from_rows(rows: Vec<(String, i64)>) -> AttendanceCounts {
    let mut counts = AttendanceCounts::default();
    for (status, n) in rows {
        match status.as_str() {
            "Present" => counts.present = n,
            "Absent" => counts.absent = n,
            "Late" => counts.late = n,
            _ => {}
        }
    }
    counts
}

pub fn student_attendance_counts(
    conn: &Connection,
    student_id: i64,
) -> Result<AttendanceCounts, CalcError> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM attendance WHERE student_id = ? GROUP BY status")
        .map_err(query_failed)?;
    let rows = stmt
        .query_map([student_id], |r| Ok((r.get::<_, String>(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(counts_from_rows(rows))
}

pub fn teacher_attendance_counts(
    conn: &Connection,
    teacher_id: i64,
) -> Result<AttendanceCounts, CalcError> {
    let mut stmt = conn
        .prepare(
            "SELECT a.status, COUNT(*)
             FROM attendance a JOIN courses c ON a.course_id = c.id
             WHERE c.teacher_id = ?
             GROUP BY a.status",
        )
        .map_err(query_failed)?;
    let rows = stmt
        .query_map([teacher_id], |r| Ok((r.get::<_, String>(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(counts_from_rows(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_point_boundaries() {
        assert_eq!(grade_point(59.0), 0.0);
        assert_eq!(grade_point(59.9), 0.0);
        assert_eq!(grade_point(60.0), 1.0);
        assert_eq!(grade_point(69.9), 1.0);
        assert_eq!(grade_point(70.0), 2.0);
        assert_eq!(grade_point(80.0), 3.0);
        assert_eq!(grade_point(89.9), 3.0);
        assert_eq!(grade_point(90.0), 4.0);
        assert_eq!(grade_point(100.0), 4.0);
    }

    #[test]
    fn grade_point_is_monotonic() {
        let mut last = 0.0;
        let mut s = 0.0;
        while s <= 100.0 {
            let p = grade_point(s);
            assert!(p >= last, "gpa dropped at score {}", s);
            last = p;
            s += 0.1;
        }
    }

    #[test]
    fn cumulative_gpa_averages_course_points_not_raw_scores() {
        let avgs = vec![
            CourseAverage {
                course_id: 1,
                name: "Math".into(),
                avg_score: 92.0,
            },
            CourseAverage {
                course_id: 2,
                name: "History".into(),
                avg_score: 61.0,
            },
        ];
        // (4.0 + 1.0) / 2, not grade_point(76.5)
        assert_eq!(cumulative_gpa(&avgs), 2.5);
        assert_eq!(cumulative_gpa(&[]), 0.0);
    }

    #[test]
    fn attendance_rate_sentinel_on_zero_logs() {
        let empty = AttendanceCounts::default();
        assert_eq!(empty.rate_percent(), None);
        assert_eq!(empty.rate_label(), "N/A");

        let some = AttendanceCounts {
            present: 2,
            absent: 1,
            late: 0,
        };
        assert_eq!(some.rate_percent(), Some(66));
        assert_eq!(some.rate_label(), "66%");
    }

    #[test]
    fn class_average_one_decimal() {
        let avgs = vec![
            CourseAverage {
                course_id: 1,
                name: "Math".into(),
                avg_score: 80.25,
            },
            CourseAverage {
                course_id: 2,
                name: "History".into(),
                avg_score: 70.0,
            },
        ];
        assert_eq!(class_average(&avgs), Some(75.1));
        assert_eq!(class_average(&[]), None);
    }

    #[test]
    fn pass_fail_threshold_at_fifty() {
        assert_eq!(pass_fail(50.0), "Pass");
        assert_eq!(pass_fail(49.9), "Fail");
    }
}
