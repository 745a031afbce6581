use crate::gradebook::{clean_cpf, Student};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_str, get_required_str, persist_student, require_db};
use crate::ipc::types::{AppState, Request};
use crate::db;
use serde_json::json;

fn handle_students_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({ "students": state.book.students() }))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let cpf = get_required_str(&req.params, "cpf")?;
    let name = get_required_str(&req.params, "name")?;
    let email = get_optional_str(&req.params, "email")?.unwrap_or_default();

    let student = Student::new(&cpf, &name, email.trim())?;
    let cpf = student.cpf.clone();
    state.book.add_student(student)?;
    persist_student(state, &cpf)?;
    tracing::debug!(cpf = %cpf, "student created");

    Ok(json!({ "student": state.book.find_student(&cpf) }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let cpf = clean_cpf(&get_required_str(&req.params, "cpf")?);
    let name = get_optional_str(&req.params, "name")?;
    let email = get_optional_str(&req.params, "email")?;

    let student = state
        .book
        .update_student(&cpf, name.as_deref(), email.as_deref())?
        .clone();
    persist_student(state, &cpf)?;

    Ok(json!({ "student": student }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let cpf = clean_cpf(&get_required_str(&req.params, "cpf")?);
    // Fail before touching the database if the student is unknown.
    if state.book.find_student(&cpf).is_none() {
        return Err(crate::error::GradebookError::not_found("Student not found").into());
    }
    db::delete_student(conn, &cpf).map_err(|e| {
        tracing::warn!(cpf = %cpf, error = %e, "student delete failed");
        HandlerErr::persist_failed(e)
    })?;
    let touched = state.book.remove_student(&cpf)?;

    Ok(json!({ "cpf": cpf, "removedFromClasses": touched }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
