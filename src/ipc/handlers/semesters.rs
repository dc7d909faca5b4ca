use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_opt_str, get_required_str, new_id, parse_date, require_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn semester_json(
    id: &str,
    name: &str,
    start_date: &str,
    end_date: &str,
    active: bool,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "startDate": start_date,
        "endDate": end_date,
        "active": active,
    })
}

fn load_semester(conn: &Connection, id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, name, start_date, end_date, active FROM semesters WHERE id = ?",
        [id],
        |r| {
            Ok(semester_json(
                &r.get::<_, String>(0)?,
                &r.get::<_, String>(1)?,
                &r.get::<_, String>(2)?,
                &r.get::<_, String>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr::new("not_found", "semester not found"))
}

fn handle_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let name = get_required_str(&req.params, "name")?;
    let start_date = parse_date(&get_required_str(&req.params, "startDate")?, "startDate")?;
    let end_date = parse_date(&get_required_str(&req.params, "endDate")?, "endDate")?;
    if end_date < start_date {
        return Err(HandlerErr::new(
            "bad_params",
            "endDate must not precede startDate",
        ));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM semesters WHERE name = ?", [name.as_str()], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if taken.is_some() {
        return Err(HandlerErr::new("conflict", "semester name already exists"));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO semesters(id, name, start_date, end_date, active) VALUES (?, ?, ?, ?, 1)",
        rusqlite::params![id, name, start_date, end_date],
    )
    .map_err(db_err)?;

    Ok(json!({ "semester": semester_json(&id, &name, &start_date, &end_date, true) }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let active_only = get_opt_bool(&req.params, "activeOnly").unwrap_or(false);
    let mut stmt = conn
        .prepare(
            "SELECT id, name, start_date, end_date, active
             FROM semesters
             WHERE (?1 = 0 OR active = 1)
             ORDER BY start_date",
        )
        .map_err(db_err)?;
    let semesters: Vec<serde_json::Value> = stmt
        .query_map([active_only as i64], |r| {
            Ok(semester_json(
                &r.get::<_, String>(0)?,
                &r.get::<_, String>(1)?,
                &r.get::<_, String>(2)?,
                &r.get::<_, String>(3)?,
                r.get::<_, i64>(4)? != 0,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "semesters": semesters }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    load_semester(conn, &semester_id)?;

    if let Some(name) = get_opt_str(&req.params, "name") {
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM semesters WHERE name = ? AND id != ?",
                rusqlite::params![name, semester_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if taken.is_some() {
            return Err(HandlerErr::new("conflict", "semester name already exists"));
        }
        conn.execute(
            "UPDATE semesters SET name = ? WHERE id = ?",
            rusqlite::params![name, semester_id],
        )
        .map_err(db_err)?;
    }
    let (current_start, current_end): (String, String) = conn
        .query_row(
            "SELECT start_date, end_date FROM semesters WHERE id = ?",
            [semester_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(db_err)?;
    let start_date = match get_opt_str(&req.params, "startDate") {
        Some(raw) => parse_date(&raw, "startDate")?,
        None => current_start,
    };
    let end_date = match get_opt_str(&req.params, "endDate") {
        Some(raw) => parse_date(&raw, "endDate")?,
        None => current_end,
    };
    if end_date < start_date {
        return Err(HandlerErr::new(
            "bad_params",
            "endDate must not precede startDate",
        ));
    }
    conn.execute(
        "UPDATE semesters SET start_date = ?, end_date = ? WHERE id = ?",
        rusqlite::params![start_date, end_date, semester_id],
    )
    .map_err(db_err)?;
    if let Some(active) = get_opt_bool(&req.params, "active") {
        conn.execute(
            "UPDATE semesters SET active = ? WHERE id = ?",
            rusqlite::params![active as i64, semester_id],
        )
        .map_err(db_err)?;
    }

    Ok(json!({ "semester": load_semester(conn, &semester_id)? }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let semester_id = get_required_str(&req.params, "semesterId")?;
    load_semester(conn, &semester_id)?;
    conn.execute(
        "UPDATE semesters SET active = 0 WHERE id = ?",
        [semester_id.as_str()],
    )
    .map_err(db_err)?;
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "semesters.create" => handle_create(state, req),
        "semesters.list" => handle_list(state, req),
        "semesters.update" => handle_update(state, req),
        "semesters.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
