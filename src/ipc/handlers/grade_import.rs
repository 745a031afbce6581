use crate::import;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, persist_class, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;

fn get_mapping(params: &serde_json::Value) -> Result<BTreeMap<String, String>, HandlerErr> {
    let Some(obj) = params.get("mapping").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing mapping"));
    };
    let mut mapping = BTreeMap::new();
    for (column, target) in obj {
        let Some(target) = target.as_str() else {
            return Err(HandlerErr {
                code: "bad_params",
                message: "mapping targets must be strings".to_string(),
                details: Some(json!({ "column": column })),
            });
        };
        mapping.insert(column.trim().to_string(), target.trim().to_string());
    }
    Ok(mapping)
}

/// Phase 1: parse the uploaded file and open a session.
fn handle_upload(state: &mut AppState, req: &Request, class_id: &str) -> Result<serde_json::Value, HandlerErr> {
    let file_path = PathBuf::from(get_required_str(&req.params, "filePath")?);
    let upload = import::begin_import(&state.book, &mut state.imports, class_id, &file_path)?;
    serde_json::to_value(upload).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: Some(json!({ "status": 500 })),
    })
}

/// Phase 2: apply the mapped rows and echo them back.
fn handle_apply(
    state: &mut AppState,
    req: &Request,
    class_id: &str,
    token: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let mapping = get_mapping(&req.params)?;
    let rows = import::apply_import(&mut state.book, &mut state.imports, class_id, token, &mapping)?;
    // An imported Final is dropped here for students already approved.
    state.book.class_mut(class_id)?.refresh_averages();
    persist_class(state, class_id)?;
    Ok(json!(rows))
}

fn handle_grade_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    match req.params.get("session_string").and_then(|v| v.as_str()) {
        Some(token) => handle_apply(state, req, &class_id, token),
        None => handle_upload(state, req, &class_id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.gradeImport" => Some(respond(&req.id, handle_grade_import(state, req))),
        _ => None,
    }
}
