use rusqlite::Connection;
use serde_json::Value;

use crate::calc::Conceito;
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::AppState;

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

/// Null or an empty/blank string means "no grade".
pub fn get_optional_grade(params: &Value, key: &str) -> Result<Option<Conceito>, HandlerErr> {
    match get_optional_str(params, key)? {
        Some(s) if !s.trim().is_empty() => Ok(Some(s.parse::<Conceito>()?)),
        _ => Ok(None),
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state.db.as_ref().ok_or_else(HandlerErr::no_workspace)
}

pub fn persist_class(state: &AppState, class_id: &str) -> Result<(), HandlerErr> {
    let conn = require_db(state)?;
    let Some(class) = state.book.find_class(class_id) else {
        return Ok(());
    };
    db::save_class(conn, class).map_err(|e| {
        tracing::warn!(class_id, error = %e, "class save failed");
        HandlerErr::persist_failed(e)
    })
}

pub fn persist_student(state: &AppState, cpf: &str) -> Result<(), HandlerErr> {
    let conn = require_db(state)?;
    let Some(student) = state.book.find_student(cpf) else {
        return Ok(());
    };
    db::save_student(conn, student).map_err(|e| {
        tracing::warn!(cpf, error = %e, "student save failed");
        HandlerErr::persist_failed(e)
    })
}
