use crate::backup;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let out_path = match get_required_str(&req.params, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "no workspace selected", None);
    };

    match backup::export_workspace_bundle(&workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
                "outPath": out_path.to_string_lossy(),
            }),
        ),
        Err(e) => err(&req.id, "io_failed", format!("{e:?}"), None),
    }
}

/// Extracts a bundle into the given workspace path and selects it as the
/// current workspace. Any open session is dropped with the old database.
fn handle_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let bundle_path = match get_required_str(&req.params, "bundlePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let workspace_path = match get_required_str(&req.params, "workspacePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };

    // Release any handle on a database inside the target workspace before
    // the import swaps the file out.
    state.db = None;
    state.session = None;

    let summary = match backup::import_workspace_bundle(&bundle_path, &workspace_path) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "io_failed", format!("{e:?}"), None),
    };

    match db::open_db(&workspace_path) {
        Ok(conn) => {
            state.workspace = Some(workspace_path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({
                    "bundleFormatDetected": summary.bundle_format_detected,
                    "workspacePath": workspace_path.to_string_lossy(),
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.import" => Some(handle_import(state, req)),
        _ => None,
    }
}
