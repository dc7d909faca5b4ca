use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_opt_f64, get_opt_i64, get_opt_str, get_required_i64,
    get_required_str, new_id, now_ts, parse_time, require_db, user_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Section thresholds drive the attendance-grade curve; an inverted pair
/// would produce garbage grades, so it is rejected at the door.
fn validate_thresholds(min_attendance: i64, max_attendance: i64) -> Result<(), HandlerErr> {
    if min_attendance < 0 {
        return Err(HandlerErr::new(
            "bad_params",
            "minAttendanceForGrade must be >= 0",
        ));
    }
    if max_attendance < min_attendance {
        return Err(HandlerErr::new(
            "bad_params",
            "maxAttendance must be >= minAttendanceForGrade",
        ));
    }
    Ok(())
}

fn section_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "description": r.get::<_, Option<String>>(2)?,
        "teacherId": r.get::<_, Option<String>>(3)?,
        "capacity": r.get::<_, i64>(4)?,
        "cost": r.get::<_, f64>(5)?,
        "minAttendanceForGrade": r.get::<_, i64>(6)?,
        "maxAttendance": r.get::<_, i64>(7)?,
        "active": r.get::<_, i64>(8)? != 0,
    }))
}

const SECTION_COLUMNS: &str = "id, name, description, teacher_id, capacity, cost,
     min_attendance_for_grade, max_attendance, active";

fn load_section(conn: &Connection, id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM sections WHERE id = ?", SECTION_COLUMNS),
        [id],
        section_json,
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr::new("not_found", "section not found"))
}

fn check_teacher_id(conn: &Connection, teacher_id: &str) -> Result<(), HandlerErr> {
    match user_role(conn, teacher_id)? {
        Some(role) if role == "teacher" || role == "moderator" => Ok(()),
        Some(_) => Err(HandlerErr::new(
            "bad_params",
            "teacherId must reference a teacher or moderator",
        )),
        None => Err(HandlerErr::new("not_found", "teacher not found")),
    }
}

fn handle_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    let description = get_opt_str(&req.params, "description");
    let teacher_id = get_opt_str(&req.params, "teacherId");
    let capacity = get_required_i64(&req.params, "capacity")?;
    let cost = get_opt_f64(&req.params, "cost").unwrap_or(0.0);
    let min_attendance = get_required_i64(&req.params, "minAttendanceForGrade")?;
    let max_attendance = get_required_i64(&req.params, "maxAttendance")?;

    validate_thresholds(min_attendance, max_attendance)?;
    if capacity < 1 {
        return Err(HandlerErr::new("bad_params", "capacity must be >= 1"));
    }
    if let Some(tid) = teacher_id.as_deref() {
        check_teacher_id(conn, tid)?;
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO sections(id, name, description, teacher_id, capacity, cost,
             min_attendance_for_grade, max_attendance, active, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![
            id,
            name,
            description,
            teacher_id,
            capacity,
            cost,
            min_attendance,
            max_attendance,
            now_ts()
        ],
    )
    .map_err(db_err)?;

    Ok(json!({ "section": load_section(conn, &id)? }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let active_only = get_opt_bool(&req.params, "activeOnly").unwrap_or(false);
    let teacher_id = get_opt_str(&req.params, "teacherId");

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM sections
             WHERE (?1 = 0 OR active = 1) AND (?2 IS NULL OR teacher_id = ?2)
             ORDER BY name",
            SECTION_COLUMNS
        ))
        .map_err(db_err)?;
    let sections: Vec<serde_json::Value> = stmt
        .query_map(rusqlite::params![active_only as i64, teacher_id], section_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "sections": sections }))
}

fn load_schedule(conn: &Connection, section_id: &str) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, day_of_week, start_time, end_time, location
             FROM schedules
             WHERE section_id = ?
             ORDER BY day_of_week, start_time",
        )
        .map_err(db_err)?;
    stmt.query_map([section_id], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "dayOfWeek": r.get::<_, i64>(1)?,
            "startTime": r.get::<_, String>(2)?,
            "endTime": r.get::<_, String>(3)?,
            "location": r.get::<_, Option<String>>(4)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

fn handle_get(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let section = load_section(conn, &section_id)?;
    let schedule = load_schedule(conn, &section_id)?;

    let enrolled: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM enrollments WHERE section_id = ? AND active = 1",
            [section_id.as_str()],
            |r| r.get(0),
        )
        .map_err(db_err)?;

    Ok(json!({
        "section": section,
        "schedule": schedule,
        "activeEnrollments": enrolled,
    }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    load_section(conn, &section_id)?;

    let (current_min, current_max): (i64, i64) = conn
        .query_row(
            "SELECT min_attendance_for_grade, max_attendance FROM sections WHERE id = ?",
            [section_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(db_err)?;
    let min_attendance = get_opt_i64(&req.params, "minAttendanceForGrade").unwrap_or(current_min);
    let max_attendance = get_opt_i64(&req.params, "maxAttendance").unwrap_or(current_max);
    validate_thresholds(min_attendance, max_attendance)?;

    if let Some(tid) = get_opt_str(&req.params, "teacherId") {
        check_teacher_id(conn, &tid)?;
        conn.execute(
            "UPDATE sections SET teacher_id = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![tid, now_ts(), section_id],
        )
        .map_err(db_err)?;
    }
    if let Some(name) = get_opt_str(&req.params, "name") {
        conn.execute(
            "UPDATE sections SET name = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![name, now_ts(), section_id],
        )
        .map_err(db_err)?;
    }
    if let Some(description) = get_opt_str(&req.params, "description") {
        conn.execute(
            "UPDATE sections SET description = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![description, now_ts(), section_id],
        )
        .map_err(db_err)?;
    }
    if let Some(capacity) = get_opt_i64(&req.params, "capacity") {
        if capacity < 1 {
            return Err(HandlerErr::new("bad_params", "capacity must be >= 1"));
        }
        conn.execute(
            "UPDATE sections SET capacity = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![capacity, now_ts(), section_id],
        )
        .map_err(db_err)?;
    }
    if let Some(cost) = get_opt_f64(&req.params, "cost") {
        conn.execute(
            "UPDATE sections SET cost = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![cost, now_ts(), section_id],
        )
        .map_err(db_err)?;
    }
    conn.execute(
        "UPDATE sections SET min_attendance_for_grade = ?, max_attendance = ?, updated_at = ?
         WHERE id = ?",
        rusqlite::params![min_attendance, max_attendance, now_ts(), section_id],
    )
    .map_err(db_err)?;
    if let Some(active) = get_opt_bool(&req.params, "active") {
        conn.execute(
            "UPDATE sections SET active = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![active as i64, now_ts(), section_id],
        )
        .map_err(db_err)?;
    }

    Ok(json!({ "section": load_section(conn, &section_id)? }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    load_section(conn, &section_id)?;
    conn.execute(
        "UPDATE sections SET active = 0, updated_at = ? WHERE id = ?",
        rusqlite::params![now_ts(), section_id],
    )
    .map_err(db_err)?;
    Ok(json!({ "deleted": true }))
}

fn handle_schedule_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    load_section(conn, &section_id)?;
    Ok(json!({ "schedule": load_schedule(conn, &section_id)? }))
}

/// Replaces the section's weekly schedule wholesale.
fn handle_schedule_set(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    load_section(conn, &section_id)?;

    let Some(entries) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };

    struct Entry {
        day_of_week: i64,
        start_time: String,
        end_time: String,
        location: Option<String>,
    }
    let mut parsed = Vec::with_capacity(entries.len());
    for e in entries {
        let day_of_week = get_required_i64(e, "dayOfWeek")?;
        if !(0..=6).contains(&day_of_week) {
            return Err(HandlerErr::new("bad_params", "dayOfWeek must be 0..=6"));
        }
        let start_time = parse_time(&get_required_str(e, "startTime")?, "startTime")?;
        let end_time = parse_time(&get_required_str(e, "endTime")?, "endTime")?;
        if end_time <= start_time {
            return Err(HandlerErr::new("bad_params", "endTime must follow startTime"));
        }
        parsed.push(Entry {
            day_of_week,
            start_time,
            end_time,
            location: get_opt_str(e, "location"),
        });
    }

    // Replace is all-or-nothing: a failed insert must not leave the section
    // with a half-written week.
    let tx = conn.unchecked_transaction().map_err(db_err)?;
    tx.execute("DELETE FROM schedules WHERE section_id = ?", [section_id.as_str()])
        .map_err(db_err)?;
    for e in &parsed {
        tx.execute(
            "INSERT INTO schedules(id, section_id, day_of_week, start_time, end_time, location)
             VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                new_id(),
                section_id,
                e.day_of_week,
                e.start_time,
                e.end_time,
                e.location
            ],
        )
        .map_err(db_err)?;
    }
    tx.commit().map_err(db_err)?;

    Ok(json!({ "schedule": load_schedule(conn, &section_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sections.create" => handle_create(state, req),
        "sections.list" => handle_list(state, req),
        "sections.get" => handle_get(state, req),
        "sections.update" => handle_update(state, req),
        "sections.delete" => handle_delete(state, req),
        "sections.schedule.list" => handle_schedule_list(state, req),
        "sections.schedule.set" => handle_schedule_set(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
