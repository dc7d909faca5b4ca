use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::grade;
use crate::ipc::error::err;
use crate::ipc::types::AppState;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &'static str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "no workspace selected"))
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_f64(params: &serde_json::Value, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

pub fn get_required_bool(params: &serde_json::Value, key: &str) -> Result<bool, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

/// Validates and normalizes a `YYYY-MM-DD` date parameter.
pub fn parse_date(raw: &str, key: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be YYYY-MM-DD", key)))
}

/// Validates and normalizes an `HH:MM` time parameter.
pub fn parse_time(raw: &str, key: &str) -> Result<String, HandlerErr> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map(|t| t.format("%H:%M").to_string())
        .map_err(|_| HandlerErr::new("bad_params", format!("{} must be HH:MM", key)))
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn user_exists(conn: &Connection, user_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM users WHERE id = ?", [user_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn user_role(conn: &Connection, user_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row("SELECT role FROM users WHERE id = ?", [user_id], |r| {
        r.get::<_, String>(0)
    })
    .optional()
    .map_err(db_err)
}

pub fn section_exists(conn: &Connection, section_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM sections WHERE id = ?", [section_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

pub fn semester_exists(conn: &Connection, semester_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM semesters WHERE id = ?", [semester_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

/// Resolves the enrollment id for a (student, section, semester) triple.
pub fn find_enrollment_id(
    conn: &Connection,
    student_id: &str,
    section_id: &str,
    semester_id: &str,
) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT id FROM enrollments
         WHERE student_id = ? AND section_id = ? AND semester_id = ?",
        [student_id, section_id, semester_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)
}

pub fn require_enrollment_id(
    conn: &Connection,
    student_id: &str,
    section_id: &str,
    semester_id: &str,
) -> Result<String, HandlerErr> {
    find_enrollment_id(conn, student_id, section_id, semester_id)?.ok_or_else(|| {
        HandlerErr::with_details(
            "not_found",
            "enrollment not found",
            json!({
                "studentId": student_id,
                "sectionId": section_id,
                "semesterId": semester_id,
            }),
        )
    })
}

pub fn present_count(conn: &Connection, enrollment_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM attendance WHERE enrollment_id = ? AND present = 1",
        [enrollment_id],
        |r| r.get(0),
    )
    .map_err(db_err)
}

pub fn has_paid(conn: &Connection, enrollment_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM payments WHERE enrollment_id = ? AND paid = 1",
        [enrollment_id],
        |r| r.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .map_err(db_err)
}

/// Recomputes and stores the final grade for one enrollment from its present
/// count, section thresholds, and normative grades. Returns the new grade.
pub fn refresh_final_grade(conn: &Connection, enrollment_id: &str) -> Result<f64, HandlerErr> {
    let thresholds: Option<(i64, i64)> = conn
        .query_row(
            "SELECT s.min_attendance_for_grade, s.max_attendance
             FROM enrollments e
             JOIN sections s ON s.id = e.section_id
             WHERE e.id = ?",
            [enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((min_attendance, max_attendance)) = thresholds else {
        return Err(HandlerErr::new("not_found", "enrollment not found"));
    };

    let attendance_count = present_count(conn, enrollment_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT grade FROM normative_results
             WHERE enrollment_id = ?
             ORDER BY recorded_at, id",
        )
        .map_err(db_err)?;
    let normative_grades: Vec<f64> = stmt
        .query_map([enrollment_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let final_grade = grade::final_grade(
        attendance_count,
        min_attendance,
        max_attendance,
        &normative_grades,
    );

    conn.execute(
        "UPDATE enrollments SET final_grade = ? WHERE id = ?",
        rusqlite::params![final_grade, enrollment_id],
    )
    .map_err(db_err)?;

    Ok(final_grade)
}
