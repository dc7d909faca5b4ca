use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_str, require_db, semester_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn to_body<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value)
        .map_err(|e| HandlerErr::new("db_query_failed", format!("serialize stats: {}", e)))
}

fn load_normative_results(
    conn: &Connection,
    enrollment_id: &str,
) -> Result<Vec<stats::NormativeResultRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT nr.normative_id, n.name, nr.result, nr.grade
             FROM normative_results nr
             JOIN normatives n ON n.id = nr.normative_id
             WHERE nr.enrollment_id = ?
             ORDER BY nr.recorded_at, nr.id",
        )
        .map_err(db_err)?;
    stmt.query_map([enrollment_id], |r| {
        Ok(stats::NormativeResultRow {
            normative_id: r.get(0)?,
            normative_name: r.get(1)?,
            result: r.get(2)?,
            grade: r.get(3)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn handle_section(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let semester_id = get_opt_str(&req.params, "semesterId");

    let section_name: Option<String> = conn
        .query_row(
            "SELECT name FROM sections WHERE id = ?",
            [section_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(section_name) = section_name else {
        return Err(HandlerErr::new("not_found", "section not found"));
    };
    if let Some(sem) = semester_id.as_deref() {
        if !semester_exists(conn, sem)? {
            return Err(HandlerErr::new("not_found", "semester not found"));
        }
    }

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.active, e.final_grade,
                    (SELECT COUNT(*) FROM attendance a
                     WHERE a.enrollment_id = e.id AND a.present = 1),
                    EXISTS(SELECT 1 FROM payments p
                           WHERE p.enrollment_id = e.id AND p.paid = 1)
             FROM enrollments e
             WHERE e.section_id = ?1 AND (?2 IS NULL OR e.semester_id = ?2)
             ORDER BY e.enrolled_at, e.id",
        )
        .map_err(db_err)?;
    let raw: Vec<(String, stats::EnrollmentRow)> = stmt
        .query_map(rusqlite::params![section_id, semester_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                stats::EnrollmentRow {
                    active: r.get::<_, i64>(1)? != 0,
                    final_grade: r.get(2)?,
                    present_count: r.get(3)?,
                    has_paid: r.get::<_, i64>(4)? != 0,
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut enrollments = Vec::with_capacity(raw.len());
    let mut normative_results = Vec::new();
    for (enrollment_id, row) in raw {
        normative_results.extend(load_normative_results(conn, &enrollment_id)?);
        enrollments.push(row);
    }

    let computed = stats::section_stats(&enrollments, &normative_results);
    let mut body = to_body(&computed)?;
    body["sectionId"] = json!(section_id);
    body["sectionName"] = json!(section_name);
    if let Some(sem) = semester_id {
        body["semesterId"] = json!(sem);
    }
    Ok(body)
}

fn handle_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;

    let student_name: Option<(String, String)> = conn
        .query_row(
            "SELECT first_name, last_name FROM users WHERE id = ? AND role = 'student'",
            [student_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((first_name, last_name)) = student_name else {
        return Err(HandlerErr::new("not_found", "student not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT e.id, e.section_id, sc.name, sc.max_attendance,
                    e.semester_id, sm.name, e.final_grade,
                    (SELECT COUNT(*) FROM attendance a
                     WHERE a.enrollment_id = e.id AND a.present = 1)
             FROM enrollments e
             JOIN sections sc ON sc.id = e.section_id
             JOIN semesters sm ON sm.id = e.semester_id
             WHERE e.student_id = ?
             ORDER BY e.enrolled_at, e.id",
        )
        .map_err(db_err)?;
    let raw: Vec<(String, stats::StudentEnrollmentRow)> = stmt
        .query_map([student_id.as_str()], |r| {
            Ok((
                r.get::<_, String>(0)?,
                stats::StudentEnrollmentRow {
                    section_id: r.get(1)?,
                    section_name: r.get(2)?,
                    max_attendance: r.get(3)?,
                    semester_id: r.get(4)?,
                    semester_name: r.get(5)?,
                    final_grade: r.get(6)?,
                    present_count: r.get(7)?,
                    normative_results: Vec::new(),
                },
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut enrollments = Vec::with_capacity(raw.len());
    for (enrollment_id, mut row) in raw {
        row.normative_results = load_normative_results(conn, &enrollment_id)?;
        enrollments.push(row);
    }

    let computed = stats::student_stats(&enrollments);
    let mut body = to_body(&computed)?;
    body["studentId"] = json!(student_id);
    body["studentName"] = json!(format!("{} {}", first_name, last_name));
    Ok(body)
}

fn handle_semester(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let semester_id = get_required_str(&req.params, "semesterId")?;

    // Unknown semester is not_found for consistency with the section and
    // student variants; an existing semester with no enrollments still
    // returns the zero-valued rollup.
    let semester_name: Option<String> = conn
        .query_row(
            "SELECT name FROM semesters WHERE id = ?",
            [semester_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(semester_name) = semester_name else {
        return Err(HandlerErr::new("not_found", "semester not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT e.section_id, sc.name, e.final_grade,
                    (SELECT COUNT(*) FROM attendance a
                     WHERE a.enrollment_id = e.id AND a.present = 1),
                    EXISTS(SELECT 1 FROM payments p
                           WHERE p.enrollment_id = e.id AND p.paid = 1)
             FROM enrollments e
             JOIN sections sc ON sc.id = e.section_id
             WHERE e.semester_id = ?
             ORDER BY e.enrolled_at, e.id",
        )
        .map_err(db_err)?;
    let enrollments: Vec<stats::SemesterEnrollmentRow> = stmt
        .query_map([semester_id.as_str()], |r| {
            Ok(stats::SemesterEnrollmentRow {
                section_id: r.get(0)?,
                section_name: r.get(1)?,
                final_grade: r.get(2)?,
                present_count: r.get(3)?,
                has_paid: r.get::<_, i64>(4)? != 0,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let computed = stats::semester_stats(&enrollments);
    let mut body = to_body(&computed)?;
    body["semesterId"] = json!(semester_id);
    body["semesterName"] = json!(semester_name);
    Ok(body)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "stats.section" => handle_section(state, req),
        "stats.student" => handle_student(state, req),
        "stats.semester" => handle_semester(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
