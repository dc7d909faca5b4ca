use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::policy::{Role, Session};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "sessionUserId": state.session.as_ref().map(|s| s.user_id.clone()),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // A session from a previous workspace would reference foreign ids.
            state.session = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let user_id = match get_required_str(&req.params, "userId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };

    let row: Option<(String, i64)> = match conn
        .query_row(
            "SELECT role, active FROM users WHERE id = ?",
            [user_id.as_str()],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((role_str, active)) = row else {
        return err(&req.id, "not_found", "user not found", None);
    };
    if active == 0 {
        return err(&req.id, "forbidden", "user is deactivated", None);
    }
    let Some(role) = Role::parse(&role_str) else {
        return err(
            &req.id,
            "db_query_failed",
            format!("user has unknown role: {}", role_str),
            None,
        );
    };

    state.session = Some(Session {
        user_id: user_id.clone(),
        role,
    });
    ok(&req.id, json!({ "userId": user_id, "role": role.as_str() }))
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let was_open = state.session.take().is_some();
    ok(&req.id, json!({ "closed": was_open }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.open" => Some(handle_session_open(state, req)),
        "session.close" => Some(handle_session_close(state, req)),
        _ => None,
    }
}
