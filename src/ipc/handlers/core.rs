use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::{Path, PathBuf};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    respond(
        &req.id,
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "importSessions": state.imports.len(),
        })),
    )
}

/// Opens (creating if needed) the workspace database and loads its registries.
pub fn open_workspace(state: &mut AppState, path: &Path) -> anyhow::Result<()> {
    let conn = db::open_db(path)?;
    let book = db::load_gradebook(&conn)?;
    tracing::info!(
        workspace = %path.display(),
        students = book.students().len(),
        classes = book.classes().len(),
        "workspace opened"
    );
    state.workspace = Some(path.to_path_buf());
    state.db = Some(conn);
    state.book = book;
    Ok(())
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let outcome = get_required_str(&req.params, "path").and_then(|p| {
        let path = PathBuf::from(p);
        open_workspace(state, &path).map_err(|e| HandlerErr {
            code: "db_open_failed",
            message: format!("{e:#}"),
            details: Some(json!({ "status": 500 })),
        })?;
        Ok(json!({
            "workspacePath": path.to_string_lossy(),
            "students": state.book.students().len(),
            "classes": state.book.classes().len(),
        }))
    });
    respond(&req.id, outcome)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
