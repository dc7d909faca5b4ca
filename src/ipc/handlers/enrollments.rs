use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, find_enrollment_id, get_opt_bool, get_opt_f64, get_opt_str, get_required_str, has_paid,
    new_id, now_ts, parse_date, present_count, refresh_final_grade, require_db,
    require_enrollment_id, section_exists, semester_exists, user_exists, user_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn enrollment_json(conn: &Connection, enrollment_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT e.id, e.student_id, u.first_name, u.last_name, u.email,
                    e.section_id, sc.name, e.semester_id, sm.name,
                    e.enrolled_at, e.disenrolled_at, e.active, e.final_grade
             FROM enrollments e
             JOIN users u ON u.id = e.student_id
             JOIN sections sc ON sc.id = e.section_id
             JOIN semesters sm ON sm.id = e.semester_id
             WHERE e.id = ?",
            [enrollment_id],
            |r| {
                Ok(json!({
                    "enrollmentId": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "studentName": format!(
                        "{} {}",
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?
                    ),
                    "studentEmail": r.get::<_, String>(4)?,
                    "sectionId": r.get::<_, String>(5)?,
                    "sectionName": r.get::<_, String>(6)?,
                    "semesterId": r.get::<_, String>(7)?,
                    "semesterName": r.get::<_, String>(8)?,
                    "enrolledAt": r.get::<_, String>(9)?,
                    "disenrolledAt": r.get::<_, Option<String>>(10)?,
                    "active": r.get::<_, i64>(11)? != 0,
                    "finalGrade": r.get::<_, Option<f64>>(12)?,
                }))
            },
        )
        .optional()
        .map_err(db_err)?;
    let Some(mut body) = row else {
        return Err(HandlerErr::new("not_found", "enrollment not found"));
    };

    body["attendanceCount"] = json!(present_count(conn, enrollment_id)?);
    body["hasPaid"] = json!(has_paid(conn, enrollment_id)?);
    Ok(body)
}

fn triple(req: &Request) -> Result<(String, String, String), HandlerErr> {
    Ok((
        get_required_str(&req.params, "studentId")?,
        get_required_str(&req.params, "sectionId")?,
        get_required_str(&req.params, "semesterId")?,
    ))
}

fn handle_enroll(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let (student_id, section_id, semester_id) = triple(req)?;

    match user_role(conn, &student_id)? {
        Some(role) if role == "student" => {}
        Some(_) => {
            return Err(HandlerErr::new(
                "bad_params",
                "studentId must reference a student",
            ))
        }
        None => return Err(HandlerErr::new("not_found", "student not found")),
    }
    if !section_exists(conn, &section_id)? {
        return Err(HandlerErr::new("not_found", "section not found"));
    }
    if !semester_exists(conn, &semester_id)? {
        return Err(HandlerErr::new("not_found", "semester not found"));
    }

    // One active enrollment per student per semester, across all sections.
    let already: Option<String> = conn
        .query_row(
            "SELECT section_id FROM enrollments
             WHERE student_id = ? AND semester_id = ? AND active = 1",
            [student_id.as_str(), semester_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if let Some(existing_section) = already {
        return Err(HandlerErr::with_details(
            "conflict",
            "student is already enrolled this semester",
            json!({ "sectionId": existing_section }),
        ));
    }

    let (capacity, enrolled): (i64, i64) = conn
        .query_row(
            "SELECT s.capacity,
                    (SELECT COUNT(*) FROM enrollments e
                     WHERE e.section_id = s.id AND e.active = 1)
             FROM sections s WHERE s.id = ?",
            [section_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(db_err)?;
    if enrolled >= capacity {
        return Err(HandlerErr::new("conflict", "section is full"));
    }

    // Re-enrollment after a disenrollment revives the existing row; the
    // triple is the enrollment's identity.
    let enrollment_id = match find_enrollment_id(conn, &student_id, &section_id, &semester_id)? {
        Some(id) => {
            conn.execute(
                "UPDATE enrollments SET active = 1, disenrolled_at = NULL, enrolled_at = ?
                 WHERE id = ?",
                rusqlite::params![now_ts(), id],
            )
            .map_err(db_err)?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO enrollments(id, student_id, section_id, semester_id,
                     enrolled_at, active)
                 VALUES (?, ?, ?, ?, ?, 1)",
                rusqlite::params![id, student_id, section_id, semester_id, now_ts()],
            )
            .map_err(db_err)?;
            id
        }
    };

    Ok(json!({ "enrollment": enrollment_json(conn, &enrollment_id)? }))
}

fn handle_disenroll(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let (student_id, section_id, semester_id) = triple(req)?;
    let enrollment_id = require_enrollment_id(conn, &student_id, &section_id, &semester_id)?;
    conn.execute(
        "UPDATE enrollments SET active = 0, disenrolled_at = ? WHERE id = ?",
        rusqlite::params![now_ts(), enrollment_id],
    )
    .map_err(db_err)?;
    Ok(json!({ "enrollment": enrollment_json(conn, &enrollment_id)? }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let (student_id, section_id, semester_id) = triple(req)?;
    let enrollment_id = require_enrollment_id(conn, &student_id, &section_id, &semester_id)?;

    if let Some(active) = get_opt_bool(&req.params, "active") {
        conn.execute(
            "UPDATE enrollments SET active = ? WHERE id = ?",
            rusqlite::params![active as i64, enrollment_id],
        )
        .map_err(db_err)?;
    }
    if let Some(final_grade) = get_opt_f64(&req.params, "finalGrade") {
        conn.execute(
            "UPDATE enrollments SET final_grade = ? WHERE id = ?",
            rusqlite::params![final_grade, enrollment_id],
        )
        .map_err(db_err)?;
    }
    if let Some(raw) = get_opt_str(&req.params, "disenrolledAt") {
        let date = parse_date(&raw, "disenrolledAt")?;
        // Setting a disenrollment date implies deactivation.
        conn.execute(
            "UPDATE enrollments SET disenrolled_at = ?, active = 0 WHERE id = ?",
            rusqlite::params![date, enrollment_id],
        )
        .map_err(db_err)?;
    }

    Ok(json!({ "enrollment": enrollment_json(conn, &enrollment_id)? }))
}

fn list_ids(
    conn: &Connection,
    sql: &str,
    binds: rusqlite::ParamsFromIter<Vec<String>>,
) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn.prepare(sql).map_err(db_err)?;
    stmt.query_map(binds, |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)
}

fn handle_list_by_student(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    if !user_exists(conn, &student_id)? {
        return Err(HandlerErr::new("not_found", "student not found"));
    }
    let ids = list_ids(
        conn,
        "SELECT id FROM enrollments WHERE student_id = ? ORDER BY enrolled_at",
        rusqlite::params_from_iter(vec![student_id]),
    )?;
    let mut enrollments = Vec::with_capacity(ids.len());
    for id in &ids {
        enrollments.push(enrollment_json(conn, id)?);
    }
    Ok(json!({ "enrollments": enrollments }))
}

fn handle_list_by_section(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    if !section_exists(conn, &section_id)? {
        return Err(HandlerErr::new("not_found", "section not found"));
    }
    let ids = match get_opt_str(&req.params, "semesterId") {
        Some(semester_id) => list_ids(
            conn,
            "SELECT id FROM enrollments
             WHERE section_id = ? AND semester_id = ?
             ORDER BY enrolled_at",
            rusqlite::params_from_iter(vec![section_id, semester_id]),
        )?,
        None => list_ids(
            conn,
            "SELECT id FROM enrollments WHERE section_id = ? ORDER BY enrolled_at",
            rusqlite::params_from_iter(vec![section_id]),
        )?,
    };
    let mut enrollments = Vec::with_capacity(ids.len());
    for id in &ids {
        enrollments.push(enrollment_json(conn, id)?);
    }
    Ok(json!({ "enrollments": enrollments }))
}

fn handle_refresh_grade(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let (student_id, section_id, semester_id) = triple(req)?;
    let enrollment_id = require_enrollment_id(conn, &student_id, &section_id, &semester_id)?;
    let final_grade = refresh_final_grade(conn, &enrollment_id)?;
    Ok(json!({ "finalGrade": final_grade }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "enrollments.enroll" => handle_enroll(state, req),
        "enrollments.disenroll" => handle_disenroll(state, req),
        "enrollments.update" => handle_update(state, req),
        "enrollments.listByStudent" => handle_list_by_student(state, req),
        "enrollments.listBySection" => handle_list_by_section(state, req),
        "enrollments.refreshGrade" => handle_refresh_grade(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
