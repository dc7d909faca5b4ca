use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_opt_str, get_required_bool, get_required_str, new_id, now_ts,
    parse_date, refresh_final_grade, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn attendance_json(conn: &Connection, attendance_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT a.id, e.student_id, u.first_name, u.last_name,
                e.section_id, sc.name, e.semester_id, sm.name,
                a.date, a.present, a.notes, a.recorded_by, a.created_at
         FROM attendance a
         JOIN enrollments e ON e.id = a.enrollment_id
         JOIN users u ON u.id = e.student_id
         JOIN sections sc ON sc.id = e.section_id
         JOIN semesters sm ON sm.id = e.semester_id
         WHERE a.id = ?",
        [attendance_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": format!("{} {}", r.get::<_, String>(2)?, r.get::<_, String>(3)?),
                "sectionId": r.get::<_, String>(4)?,
                "sectionName": r.get::<_, String>(5)?,
                "semesterId": r.get::<_, String>(6)?,
                "semesterName": r.get::<_, String>(7)?,
                "date": r.get::<_, String>(8)?,
                "present": r.get::<_, i64>(9)? != 0,
                "notes": r.get::<_, Option<String>>(10)?,
                "recordedBy": r.get::<_, Option<String>>(11)?,
                "createdAt": r.get::<_, String>(12)?,
            }))
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr::new("not_found", "attendance record not found"))
}

/// Resolves the *active* enrollment for the triple; recording attendance for
/// a disenrolled student is rejected.
fn active_enrollment_id(
    conn: &Connection,
    student_id: &str,
    section_id: &str,
    semester_id: &str,
) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT id FROM enrollments
         WHERE student_id = ? AND section_id = ? AND semester_id = ? AND active = 1",
        [student_id, section_id, semester_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| {
        HandlerErr::with_details(
            "not_found",
            "student is not actively enrolled in this section",
            json!({ "studentId": student_id, "sectionId": section_id }),
        )
    })
}

fn recorded_by(state: &AppState) -> Option<String> {
    state.session.as_ref().map(|s| s.user_id.clone())
}

fn handle_record(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    let date = parse_date(&get_required_str(&req.params, "date")?, "date")?;
    let present = get_required_bool(&req.params, "present")?;
    let notes = get_opt_str(&req.params, "notes");

    let enrollment_id = active_enrollment_id(conn, &student_id, &section_id, &semester_id)?;

    let duplicate: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance WHERE enrollment_id = ? AND date = ?",
            [enrollment_id.as_str(), date.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if duplicate.is_some() {
        return Err(HandlerErr::with_details(
            "conflict",
            "attendance already recorded for this date",
            json!({ "date": date }),
        ));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO attendance(id, enrollment_id, date, present, notes, recorded_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            enrollment_id,
            date,
            present as i64,
            notes,
            recorded_by(state),
            now_ts()
        ],
    )
    .map_err(db_err)?;

    let final_grade = refresh_final_grade(conn, &enrollment_id)?;
    let mut body = json!({ "attendance": attendance_json(conn, &id)? });
    body["finalGrade"] = json!(final_grade);
    Ok(body)
}

/// One date, one section, many students: replaces any rows already recorded
/// for that date, then inserts the batch and refreshes every grade.
fn handle_record_bulk(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    let date = parse_date(&get_required_str(&req.params, "date")?, "date")?;
    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };
    if entries.is_empty() {
        return Err(HandlerErr::new("bad_params", "entries must not be empty"));
    }

    struct Entry {
        enrollment_id: String,
        present: bool,
        notes: Option<String>,
    }
    let mut parsed: Vec<Entry> = Vec::with_capacity(entries.len());
    let mut unenrolled: Vec<String> = Vec::new();
    for e in entries {
        let student_id = get_required_str(e, "studentId")?;
        let present = get_required_bool(e, "present")?;
        match active_enrollment_id(conn, &student_id, &section_id, &semester_id) {
            Ok(enrollment_id) => {
                if parsed.iter().any(|p| p.enrollment_id == enrollment_id) {
                    return Err(HandlerErr::with_details(
                        "bad_params",
                        "duplicate student in entries",
                        json!({ "studentId": student_id }),
                    ));
                }
                parsed.push(Entry {
                    enrollment_id,
                    present,
                    notes: get_opt_str(e, "notes"),
                });
            }
            Err(lookup) if lookup.code == "not_found" => unenrolled.push(student_id),
            Err(lookup) => return Err(lookup),
        }
    }
    if !unenrolled.is_empty() {
        return Err(HandlerErr::with_details(
            "bad_params",
            "some students are not actively enrolled in this section",
            json!({ "studentIds": unenrolled }),
        ));
    }

    // The whole sheet lands or none of it does; grades are refreshed inside
    // the same transaction.
    let recorded = recorded_by(state);
    let tx = conn.unchecked_transaction().map_err(db_err)?;
    let mut ids = Vec::with_capacity(parsed.len());
    for e in &parsed {
        tx.execute(
            "DELETE FROM attendance WHERE enrollment_id = ? AND date = ?",
            [e.enrollment_id.as_str(), date.as_str()],
        )
        .map_err(db_err)?;
        let id = new_id();
        tx.execute(
            "INSERT INTO attendance(id, enrollment_id, date, present, notes, recorded_by,
                 created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                id,
                e.enrollment_id,
                date,
                e.present as i64,
                e.notes,
                recorded,
                now_ts()
            ],
        )
        .map_err(db_err)?;
        ids.push(id);
    }

    for e in &parsed {
        refresh_final_grade(&tx, &e.enrollment_id)?;
    }
    tx.commit().map_err(db_err)?;

    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        out.push(attendance_json(conn, id)?);
    }
    Ok(json!({ "attendances": out }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let attendance_id = get_required_str(&req.params, "attendanceId")?;
    let enrollment_id: Option<String> = conn
        .query_row(
            "SELECT enrollment_id FROM attendance WHERE id = ?",
            [attendance_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(enrollment_id) = enrollment_id else {
        return Err(HandlerErr::new("not_found", "attendance record not found"));
    };

    if let Some(present) = get_opt_bool(&req.params, "present") {
        conn.execute(
            "UPDATE attendance SET present = ?, recorded_by = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![present as i64, recorded_by(state), now_ts(), attendance_id],
        )
        .map_err(db_err)?;
    }
    if let Some(notes) = get_opt_str(&req.params, "notes") {
        conn.execute(
            "UPDATE attendance SET notes = ?, recorded_by = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![notes, recorded_by(state), now_ts(), attendance_id],
        )
        .map_err(db_err)?;
    }

    let final_grade = refresh_final_grade(conn, &enrollment_id)?;
    let mut body = json!({ "attendance": attendance_json(conn, &attendance_id)? });
    body["finalGrade"] = json!(final_grade);
    Ok(body)
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let attendance_id = get_required_str(&req.params, "attendanceId")?;
    let enrollment_id: Option<String> = conn
        .query_row(
            "SELECT enrollment_id FROM attendance WHERE id = ?",
            [attendance_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(enrollment_id) = enrollment_id else {
        return Err(HandlerErr::new("not_found", "attendance record not found"));
    };

    conn.execute("DELETE FROM attendance WHERE id = ?", [attendance_id.as_str()])
        .map_err(db_err)?;
    let final_grade = refresh_final_grade(conn, &enrollment_id)?;
    Ok(json!({ "deleted": true, "finalGrade": final_grade }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_opt_str(&req.params, "studentId");
    let section_id = get_opt_str(&req.params, "sectionId");
    let semester_id = get_opt_str(&req.params, "semesterId");
    let from = match get_opt_str(&req.params, "from") {
        Some(raw) => Some(parse_date(&raw, "from")?),
        None => None,
    };
    let to = match get_opt_str(&req.params, "to") {
        Some(raw) => Some(parse_date(&raw, "to")?),
        None => None,
    };

    let mut stmt = conn
        .prepare(
            "SELECT a.id
             FROM attendance a
             JOIN enrollments e ON e.id = a.enrollment_id
             WHERE (?1 IS NULL OR e.student_id = ?1)
               AND (?2 IS NULL OR e.section_id = ?2)
               AND (?3 IS NULL OR e.semester_id = ?3)
               AND (?4 IS NULL OR a.date >= ?4)
               AND (?5 IS NULL OR a.date <= ?5)
             ORDER BY a.date, a.id",
        )
        .map_err(db_err)?;
    let ids: Vec<String> = stmt
        .query_map(
            rusqlite::params![student_id, section_id, semester_id, from, to],
            |r| r.get(0),
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
        out.push(attendance_json(conn, id)?);
    }
    Ok(json!({ "attendances": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "attendance.record" => handle_record(state, req),
        "attendance.recordBulk" => handle_record_bulk(state, req),
        "attendance.update" => handle_update(state, req),
        "attendance.delete" => handle_delete(state, req),
        "attendance.list" => handle_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
