use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_opt_str, get_required_f64, get_required_str, new_id, now_ts,
    refresh_final_grade, require_db, require_enrollment_id, section_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn normative_json(conn: &Connection, normative_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, section_id, name, description, active FROM normatives WHERE id = ?",
        [normative_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sectionId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr::new("not_found", "normative not found"))
}

fn result_json(conn: &Connection, result_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT nr.id, nr.normative_id, n.name, e.student_id,
                e.section_id, e.semester_id, nr.result, nr.grade, nr.notes, nr.recorded_at
         FROM normative_results nr
         JOIN normatives n ON n.id = nr.normative_id
         JOIN enrollments e ON e.id = nr.enrollment_id
         WHERE nr.id = ?",
        [result_id],
        |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "normativeId": r.get::<_, String>(1)?,
                "normativeName": r.get::<_, String>(2)?,
                "studentId": r.get::<_, String>(3)?,
                "sectionId": r.get::<_, String>(4)?,
                "semesterId": r.get::<_, String>(5)?,
                "result": r.get::<_, String>(6)?,
                "grade": r.get::<_, f64>(7)?,
                "notes": r.get::<_, Option<String>>(8)?,
                "recordedAt": r.get::<_, String>(9)?,
            }))
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr::new("not_found", "normative result not found"))
}

fn handle_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let name = get_required_str(&req.params, "name")?;
    let description = get_opt_str(&req.params, "description");
    if !section_exists(conn, &section_id)? {
        return Err(HandlerErr::new("not_found", "section not found"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO normatives(id, section_id, name, description, active, created_at)
         VALUES (?, ?, ?, ?, 1, ?)",
        rusqlite::params![id, section_id, name, description, now_ts()],
    )
    .map_err(db_err)?;
    Ok(json!({ "normative": normative_json(conn, &id)? }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    if !section_exists(conn, &section_id)? {
        return Err(HandlerErr::new("not_found", "section not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, section_id, name, description, active
             FROM normatives WHERE section_id = ? ORDER BY created_at, id",
        )
        .map_err(db_err)?;
    let normatives: Vec<serde_json::Value> = stmt
        .query_map([section_id.as_str()], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "sectionId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "description": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "normatives": normatives }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let normative_id = get_required_str(&req.params, "normativeId")?;
    normative_json(conn, &normative_id)?;

    if let Some(name) = get_opt_str(&req.params, "name") {
        conn.execute(
            "UPDATE normatives SET name = ? WHERE id = ?",
            rusqlite::params![name, normative_id],
        )
        .map_err(db_err)?;
    }
    if let Some(description) = get_opt_str(&req.params, "description") {
        conn.execute(
            "UPDATE normatives SET description = ? WHERE id = ?",
            rusqlite::params![description, normative_id],
        )
        .map_err(db_err)?;
    }
    if let Some(active) = get_opt_bool(&req.params, "active") {
        conn.execute(
            "UPDATE normatives SET active = ? WHERE id = ?",
            rusqlite::params![active as i64, normative_id],
        )
        .map_err(db_err)?;
    }
    Ok(json!({ "normative": normative_json(conn, &normative_id)? }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let normative_id = get_required_str(&req.params, "normativeId")?;
    normative_json(conn, &normative_id)?;
    conn.execute(
        "UPDATE normatives SET active = 0 WHERE id = ?",
        [normative_id.as_str()],
    )
    .map_err(db_err)?;
    Ok(json!({ "deleted": true }))
}

/// Upserts one student's result for one normative, then refreshes the
/// stored final grade.
fn handle_record_result(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    let normative_id = get_required_str(&req.params, "normativeId")?;
    let result = get_required_str(&req.params, "result")?;
    let grade = get_required_f64(&req.params, "grade")?;
    let notes = get_opt_str(&req.params, "notes");

    if !(0.0..=100.0).contains(&grade) {
        return Err(HandlerErr::new("bad_params", "grade must be within 0..=100"));
    }

    let normative_section: Option<String> = conn
        .query_row(
            "SELECT section_id FROM normatives WHERE id = ?",
            [normative_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(normative_section) = normative_section else {
        return Err(HandlerErr::new("not_found", "normative not found"));
    };
    if normative_section != section_id {
        return Err(HandlerErr::new(
            "bad_params",
            "normative belongs to a different section",
        ));
    }

    let enrollment_id = require_enrollment_id(conn, &student_id, &section_id, &semester_id)?;
    let recorded_by = state.session.as_ref().map(|s| s.user_id.clone());

    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM normative_results WHERE enrollment_id = ? AND normative_id = ?",
            [enrollment_id.as_str(), normative_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let result_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE normative_results
                 SET result = ?, grade = ?, notes = ?, recorded_by = ?, updated_at = ?
                 WHERE id = ?",
                rusqlite::params![result, grade, notes, recorded_by, now_ts(), id],
            )
            .map_err(db_err)?;
            id
        }
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO normative_results(id, enrollment_id, normative_id, result, grade,
                     notes, recorded_by, recorded_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    enrollment_id,
                    normative_id,
                    result,
                    grade,
                    notes,
                    recorded_by,
                    now_ts()
                ],
            )
            .map_err(db_err)?;
            id
        }
    };

    let final_grade = refresh_final_grade(conn, &enrollment_id)?;
    let mut body = json!({ "result": result_json(conn, &result_id)? });
    body["finalGrade"] = json!(final_grade);
    Ok(body)
}

fn handle_delete_result(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let result_id = get_required_str(&req.params, "resultId")?;
    let enrollment_id: Option<String> = conn
        .query_row(
            "SELECT enrollment_id FROM normative_results WHERE id = ?",
            [result_id.as_str()],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    let Some(enrollment_id) = enrollment_id else {
        return Err(HandlerErr::new("not_found", "normative result not found"));
    };
    conn.execute(
        "DELETE FROM normative_results WHERE id = ?",
        [result_id.as_str()],
    )
    .map_err(db_err)?;
    let final_grade = refresh_final_grade(conn, &enrollment_id)?;
    Ok(json!({ "deleted": true, "finalGrade": final_grade }))
}

fn handle_list_results(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    let enrollment_id = require_enrollment_id(conn, &student_id, &section_id, &semester_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id FROM normative_results
             WHERE enrollment_id = ?
             ORDER BY recorded_at, id",
        )
        .map_err(db_err)?;
    let ids: Vec<String> = stmt
        .query_map([enrollment_id.as_str()], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut results = Vec::with_capacity(ids.len());
    for id in &ids {
        results.push(result_json(conn, id)?);
    }
    Ok(json!({ "results": results }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "normatives.create" => handle_create(state, req),
        "normatives.list" => handle_list(state, req),
        "normatives.update" => handle_update(state, req),
        "normatives.delete" => handle_delete(state, req),
        "normatives.recordResult" => handle_record_result(state, req),
        "normatives.deleteResult" => handle_delete_result(state, req),
        "normatives.listResults" => handle_list_results(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
