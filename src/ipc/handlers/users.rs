use crate::ipc::error::ok;
use crate::ipc::helpers::{
    db_err, get_opt_bool, get_opt_str, get_required_str, new_id, now_ts, require_db, HandlerErr,
};
use crate::ipc::policy::Role;
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn user_json(
    id: &str,
    first_name: &str,
    last_name: &str,
    email: &str,
    role: &str,
    active: bool,
    created_at: &str,
) -> serde_json::Value {
    json!({
        "id": id,
        "firstName": first_name,
        "lastName": last_name,
        "email": email,
        "role": role,
        "active": active,
        "createdAt": created_at,
    })
}

fn load_user(conn: &Connection, user_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, first_name, last_name, email, role, active, created_at
         FROM users WHERE id = ?",
        [user_id],
        |r| {
            Ok(user_json(
                &r.get::<_, String>(0)?,
                &r.get::<_, String>(1)?,
                &r.get::<_, String>(2)?,
                &r.get::<_, String>(3)?,
                &r.get::<_, String>(4)?,
                r.get::<_, i64>(5)? != 0,
                &r.get::<_, String>(6)?,
            ))
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr::new("not_found", "user not found"))
}

fn handle_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let first_name = get_required_str(&req.params, "firstName")?;
    let last_name = get_required_str(&req.params, "lastName")?;
    let email = get_required_str(&req.params, "email")?;
    let role = get_required_str(&req.params, "role")?;
    if Role::parse(&role).is_none() {
        return Err(HandlerErr::new(
            "bad_params",
            "role must be student, teacher, or moderator",
        ));
    }
    if email.trim().is_empty() || !email.contains('@') {
        return Err(HandlerErr::new("bad_params", "email is not valid"));
    }

    let taken: Option<i64> = conn
        .query_row("SELECT 1 FROM users WHERE email = ?", [email.as_str()], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    if taken.is_some() {
        return Err(HandlerErr::new("conflict", "email is already registered"));
    }

    let id = new_id();
    let created_at = now_ts();
    conn.execute(
        "INSERT INTO users(id, first_name, last_name, email, role, active, created_at)
         VALUES (?, ?, ?, ?, ?, 1, ?)",
        rusqlite::params![id, first_name, last_name, email, role, created_at],
    )
    .map_err(db_err)?;

    Ok(json!({ "user": user_json(&id, &first_name, &last_name, &email, &role, true, &created_at) }))
}

fn handle_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let role_filter = get_opt_str(&req.params, "role");
    if let Some(role) = role_filter.as_deref() {
        if Role::parse(role).is_none() {
            return Err(HandlerErr::new(
                "bad_params",
                "role must be student, teacher, or moderator",
            ));
        }
    }
    let active_only = get_opt_bool(&req.params, "activeOnly").unwrap_or(false);

    let mut stmt = conn
        .prepare(
            "SELECT id, first_name, last_name, email, role, active, created_at
             FROM users
             WHERE (?1 IS NULL OR role = ?1) AND (?2 = 0 OR active = 1)
             ORDER BY last_name, first_name",
        )
        .map_err(db_err)?;
    let users: Vec<serde_json::Value> = stmt
        .query_map(
            rusqlite::params![role_filter, active_only as i64],
            |r| {
                Ok(user_json(
                    &r.get::<_, String>(0)?,
                    &r.get::<_, String>(1)?,
                    &r.get::<_, String>(2)?,
                    &r.get::<_, String>(3)?,
                    &r.get::<_, String>(4)?,
                    r.get::<_, i64>(5)? != 0,
                    &r.get::<_, String>(6)?,
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    Ok(json!({ "users": users }))
}

fn handle_update(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let user_id = get_required_str(&req.params, "userId")?;
    // Ensure the row exists before applying partial updates.
    load_user(conn, &user_id)?;

    if let Some(first_name) = get_opt_str(&req.params, "firstName") {
        conn.execute(
            "UPDATE users SET first_name = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![first_name, now_ts(), user_id],
        )
        .map_err(db_err)?;
    }
    if let Some(last_name) = get_opt_str(&req.params, "lastName") {
        conn.execute(
            "UPDATE users SET last_name = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![last_name, now_ts(), user_id],
        )
        .map_err(db_err)?;
    }
    if let Some(email) = get_opt_str(&req.params, "email") {
        if email.trim().is_empty() || !email.contains('@') {
            return Err(HandlerErr::new("bad_params", "email is not valid"));
        }
        let taken: Option<String> = conn
            .query_row(
                "SELECT id FROM users WHERE email = ? AND id != ?",
                rusqlite::params![email, user_id],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;
        if taken.is_some() {
            return Err(HandlerErr::new("conflict", "email is already registered"));
        }
        conn.execute(
            "UPDATE users SET email = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![email, now_ts(), user_id],
        )
        .map_err(db_err)?;
    }
    if let Some(role) = get_opt_str(&req.params, "role") {
        if Role::parse(&role).is_none() {
            return Err(HandlerErr::new(
                "bad_params",
                "role must be student, teacher, or moderator",
            ));
        }
        conn.execute(
            "UPDATE users SET role = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![role, now_ts(), user_id],
        )
        .map_err(db_err)?;
    }
    if let Some(active) = get_opt_bool(&req.params, "active") {
        conn.execute(
            "UPDATE users SET active = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![active as i64, now_ts(), user_id],
        )
        .map_err(db_err)?;
    }

    Ok(json!({ "user": load_user(conn, &user_id)? }))
}

fn handle_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let user_id = get_required_str(&req.params, "userId")?;
    load_user(conn, &user_id)?;

    // Deactivation, not row deletion: enrollments and recorded attendance
    // keep their author references.
    conn.execute(
        "UPDATE users SET active = 0, updated_at = ? WHERE id = ?",
        rusqlite::params![now_ts(), user_id],
    )
    .map_err(db_err)?;

    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "users.create" => handle_create(state, req),
        "users.list" => handle_list(state, req),
        "users.update" => handle_update(state, req),
        "users.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
