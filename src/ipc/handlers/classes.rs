use crate::calc::{GradeSpecification, FINAL_GOAL};
use crate::db;
use crate::error::GradebookError;
use crate::gradebook::{clean_cpf, Class};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_optional_grade, get_required_str, persist_class, require_db};
use crate::ipc::types::{AppState, Request};
use crate::status;
use serde_json::json;

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn class_summary(class: &Class) -> serde_json::Value {
    json!({
        "id": class.id(),
        "topic": class.topic(),
        "semester": class.semester(),
        "year": class.year(),
        "enrollmentCount": class.enrollments().len(),
        "customSpecification": class.custom_specification().is_some(),
    })
}

fn class_detail(class: &mut Class) -> serde_json::Value {
    class.refresh_averages();
    let class_average = class.class_average();
    let enrollments: Vec<_> = class.enrollments().iter().map(|e| e.to_record()).collect();
    json!({
        "id": class.id(),
        "topic": class.topic(),
        "semester": class.semester(),
        "year": class.year(),
        "specification": class.specification(),
        "customSpecification": class.custom_specification().is_some(),
        "classAverage": class_average,
        "enrollments": enrollments,
    })
}

fn handle_classes_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let classes: Vec<_> = state.book.classes().iter().map(class_summary).collect();
    Ok(json!({ "classes": classes }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let topic = get_required_str(&req.params, "topic")?;
    let semester = get_required_i64(&req.params, "semester")?;
    let year = get_required_i64(&req.params, "year")?;
    let semester = u8::try_from(semester)
        .map_err(|_| HandlerErr::from(GradebookError::validation("semester must be 1 or 2")))?;
    let year = i32::try_from(year).map_err(|_| HandlerErr::bad_params("year out of range"))?;

    let specification = match req.params.get("specification") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => Some(
            serde_json::from_value::<GradeSpecification>(v.clone()).map_err(|e| {
                GradebookError::validation(format!("invalid specification: {}", e))
            })?,
        ),
    };

    let class = Class::new(&topic, semester, year, specification)?;
    let class_id = class.id();
    state.book.add_class(class)?;
    persist_class(state, &class_id)?;
    tracing::info!(class_id = %class_id, "class created");

    let summary = state.book.find_class(&class_id).map(class_summary);
    Ok(json!({ "classId": class_id, "class": summary }))
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let class = state.book.class_mut(&class_id)?;
    Ok(class_detail(class))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    if state.book.find_class(&class_id).is_none() {
        return Err(GradebookError::not_found("Class not Found").into());
    }
    db::delete_class(conn, &class_id).map_err(|e| {
        tracing::warn!(class_id = %class_id, error = %e, "class delete failed");
        HandlerErr::persist_failed(e)
    })?;
    state.book.remove_class(&class_id);
    Ok(json!({ "classId": class_id, "deleted": true }))
}

fn handle_students_status(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let class_id = get_required_str(&req.params, "classId")?;
    let roster = state.book.students().to_vec();
    let class = state.book.class_mut(&class_id)?;
    let report = status::class_status_report(class, &roster);
    serde_json::to_value(report).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: Some(json!({ "status": 500 })),
    })
}

/// `classId` and a cleaned `cpf`, the shared key of every enrollment method.
fn enrollment_key(req: &Request) -> Result<(String, String), HandlerErr> {
    let class_id = get_required_str(&req.params, "classId")?;
    let cpf = clean_cpf(&get_required_str(&req.params, "cpf")?);
    Ok((class_id, cpf))
}

/// Refreshes the class averages (an approved student loses the exam grade
/// here) and renders one enrollment.
fn enrollment_view(state: &mut AppState, class_id: &str, cpf: &str) -> Result<serde_json::Value, HandlerErr> {
    let class = state.book.class_mut(class_id)?;
    class.refresh_averages();
    let record = class.find_enrollment(cpf).map(|e| e.to_record());
    Ok(json!({ "classId": class_id, "enrollment": record }))
}

fn handle_enrollments_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let (class_id, cpf) = enrollment_key(req)?;
    state.book.enroll(&class_id, &cpf)?;
    let view = enrollment_view(state, &class_id, &cpf)?;
    persist_class(state, &class_id)?;
    Ok(view)
}

fn handle_enrollments_remove(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let (class_id, cpf) = enrollment_key(req)?;
    let class = state.book.class_mut(&class_id)?;
    if !class.remove_enrollment(&cpf) {
        return Err(GradebookError::not_found(format!(
            "Student with CPF {} is not enrolled in class {}",
            cpf, class_id
        ))
        .into());
    }
    persist_class(state, &class_id)?;
    Ok(json!({ "classId": class_id, "cpf": cpf, "removed": true }))
}

fn handle_enrollments_set_evaluation(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let (class_id, cpf) = enrollment_key(req)?;
    let goal = get_required_str(&req.params, "goal")?;
    let goal = goal.trim();
    let grade = get_optional_grade(&req.params, "grade")?;

    let class = state.book.class_mut(&class_id)?;
    if goal == FINAL_GOAL {
        class.set_nota_final(&cpf, grade)?;
    } else {
        if !class.specification().knows_goal(goal) {
            return Err(GradebookError::validation(format!(
                "unknown goal '{}' for class {}",
                goal, class_id
            ))
            .into());
        }
        match grade {
            Some(g) => class.add_or_update_evaluation(&cpf, goal, g)?,
            None => {
                class.remove_evaluation(&cpf, goal)?;
            }
        }
    }
    let view = enrollment_view(state, &class_id, &cpf)?;
    persist_class(state, &class_id)?;
    Ok(view)
}

fn handle_enrollments_set_nota_final(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let (class_id, cpf) = enrollment_key(req)?;
    let grade = get_optional_grade(&req.params, "grade")?;
    state.book.class_mut(&class_id)?.set_nota_final(&cpf, grade)?;
    let view = enrollment_view(state, &class_id, &cpf)?;
    persist_class(state, &class_id)?;
    Ok(view)
}

fn handle_enrollments_set_reprovado(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    require_db(state)?;
    let (class_id, cpf) = enrollment_key(req)?;
    let value = req
        .params
        .get("value")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::bad_params("missing value"))?;
    state
        .book
        .class_mut(&class_id)?
        .set_reprovado_por_falta(&cpf, value)?;
    let view = enrollment_view(state, &class_id, &cpf)?;
    persist_class(state, &class_id)?;
    Ok(view)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let outcome = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.get" => handle_classes_get(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        "classes.studentsStatus" => handle_students_status(state, req),
        "enrollments.add" => handle_enrollments_add(state, req),
        "enrollments.remove" => handle_enrollments_remove(state, req),
        "enrollments.setEvaluation" => handle_enrollments_set_evaluation(state, req),
        "enrollments.setNotaFinal" => handle_enrollments_set_nota_final(state, req),
        "enrollments.setReprovadoPorFalta" => handle_enrollments_set_reprovado(state, req),
        _ => return None,
    };
    Some(respond(&req.id, outcome))
}
