use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_str, get_required_bool, get_required_f64, get_required_str, new_id, now_ts,
    require_db, require_enrollment_id, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_record(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let section_id = get_required_str(&req.params, "sectionId")?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    let amount = get_required_f64(&req.params, "amount")?;
    let paid = get_required_bool(&req.params, "paid")?;
    let notes = get_opt_str(&req.params, "notes");

    if amount < 0.0 {
        return Err(HandlerErr::new("bad_params", "amount must not be negative"));
    }
    let enrollment_id = require_enrollment_id(conn, &student_id, &section_id, &semester_id)?;

    let id = new_id();
    let paid_at = now_ts();
    conn.execute(
        "INSERT INTO payments(id, enrollment_id, amount, paid, notes, recorded_by, paid_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            enrollment_id,
            amount,
            paid as i64,
            notes,
            state.session.as_ref().map(|s| s.user_id.clone()),
            paid_at
        ],
    )
    .map_err(db_err)?;

    Ok(json!({
        "payment": {
            "id": id,
            "studentId": student_id,
            "sectionId": section_id,
            "semesterId": semester_id,
            "amount": amount,
            "paid": paid,
            "notes": notes,
            "paidAt": paid_at,
        }
    }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let student_id = get_opt_str(&req.params, "studentId");
    let section_id = get_opt_str(&req.params, "sectionId");
    let semester_id = get_opt_str(&req.params, "semesterId");

    let mut stmt = conn
        .prepare(
            "SELECT p.id, e.student_id, e.section_id, e.semester_id,
                    p.amount, p.paid, p.notes, p.paid_at
             FROM payments p
             JOIN enrollments e ON e.id = p.enrollment_id
             WHERE (?1 IS NULL OR e.student_id = ?1)
               AND (?2 IS NULL OR e.section_id = ?2)
               AND (?3 IS NULL OR e.semester_id = ?3)
             ORDER BY p.paid_at, p.id",
        )
        .map_err(db_err)?;
    let payments: Vec<serde_json::Value> = stmt
        .query_map(
            rusqlite::params![student_id, section_id, semester_id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "sectionId": r.get::<_, String>(2)?,
                    "semesterId": r.get::<_, String>(3)?,
                    "amount": r.get::<_, f64>(4)?,
                    "paid": r.get::<_, i64>(5)? != 0,
                    "notes": r.get::<_, Option<String>>(6)?,
                    "paidAt": r.get::<_, String>(7)?,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "payments": payments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "payments.record" => handle_record(state, req),
        "payments.list" => handle_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
