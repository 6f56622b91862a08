//! Demo data for a fresh workspace: a handful of teachers, students and
//! courses with randomized enrollments, grades and attendance. Everything
//! runs in one transaction so a failure leaves the workspace untouched.

use chrono::{Duration, Local};
use rand::seq::SliceRandom;
use rand::Rng;
use rusqlite::Connection;
use serde::Serialize;

use crate::db;
use crate::passwd;

const TEACHERS: [&str; 3] = ["mr_smith", "ms_jones", "dr_brown"];
const STUDENTS: [&str; 5] = ["alice", "bob", "charlie", "david", "eve"];
const GRADE_TYPES: [&str; 3] = ["Homework", "Quiz", "Midterm"];
const ATTENDANCE_POOL: [&str; 5] = ["Present", "Present", "Present", "Absent", "Late"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeededUser {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeededCourse {
    pub id: i64,
    pub name: String,
    pub teacher_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedSummary {
    pub teachers: Vec<SeededUser>,
    pub students: Vec<SeededUser>,
    pub courses: Vec<SeededCourse>,
    pub grades: usize,
    pub attendance_logs: usize,
}

/// Demo accounts all share the password "password".
pub fn seed_demo(conn: &Connection) -> anyhow::Result<SeedSummary> {
    let mut rng = rand::thread_rng();
    let tx = conn.unchecked_transaction()?;

    let insert_user = |username: &str, role: &str| -> anyhow::Result<i64> {
        tx.execute(
            "INSERT INTO users (username, password_hash, role, created_at) VALUES (?, ?, ?, ?)",
            (username, passwd::hash_password("password"), role, db::now_ts()),
        )?;
        Ok(tx.last_insert_rowid())
    };

    let mut teachers = Vec::new();
    for username in TEACHERS {
        let id = insert_user(username, "teacher")?;
        teachers.push(SeededUser {
            id,
            username: username.to_string(),
        });
    }

    let mut students = Vec::new();
    for username in STUDENTS {
        let id = insert_user(username, "student")?;
        students.push(SeededUser {
            id,
            username: username.to_string(),
        });
    }

    let course_defs = [
        ("Mathematics 101", teachers[0].id, "Mon/Wed 10:00 AM"),
        ("History 201", teachers[1].id, "Tue/Thu 2:00 PM"),
        ("Physics 101", teachers[2].id, "Fri 9:00 AM"),
        ("Computer Science", teachers[0].id, "Mon/Wed 1:00 PM"),
    ];
    let mut courses = Vec::new();
    for (name, teacher_id, schedule) in course_defs {
        tx.execute(
            "INSERT INTO courses (name, teacher_id, schedule) VALUES (?, ?, ?)",
            (name, teacher_id, schedule),
        )?;
        courses.push(SeededCourse {
            id: tx.last_insert_rowid(),
            name: name.to_string(),
            teacher_id,
        });
    }

    let mut grades = 0usize;
    let mut attendance_logs = 0usize;
    for student in &students {
        let picked: Vec<&SeededCourse> = courses.choose_multiple(&mut rng, 2).collect();
        for course in picked {
            tx.execute(
                "INSERT OR IGNORE INTO enrollments (student_id, course_id) VALUES (?, ?)",
                (student.id, course.id),
            )?;

            let score: i64 = rng.gen_range(60..=100);
            let grade_type = GRADE_TYPES.choose(&mut rng).copied().unwrap_or("Homework");
            tx.execute(
                "INSERT INTO grades (student_id, course_id, score, grade_type, created_at)
                 VALUES (?, ?, ?, ?, ?)",
                (student.id, course.id, score as f64, grade_type, db::now_ts()),
            )?;
            grades += 1;

            for i in 0..3i64 {
                let date = (Local::now() - Duration::days(i * 2))
                    .format("%Y-%m-%d")
                    .to_string();
                let status = ATTENDANCE_POOL.choose(&mut rng).copied().unwrap_or("Present");
                tx.execute(
                    "INSERT INTO attendance (student_id, course_id, date, status)
                     VALUES (?, ?, ?, ?)",
                    (student.id, course.id, date, status),
                )?;
                attendance_logs += 1;
            }
        }
    }

    tx.commit()?;

    Ok(SeedSummary {
        teachers,
        students,
        courses,
        grades,
        attendance_logs,
    })
}
