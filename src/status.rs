use serde::Serialize;

use crate::gradebook::{Class, Student};

/// Band a student falls into relative to the class average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusColor {
    Green,
    Yellow,
    Red,
}

/// Yellow covers averages down to this fraction of the class average.
const YELLOW_FLOOR: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReason {
    pub description: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusDetail {
    pub color: StatusColor,
    pub reasons: Vec<StatusReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[allow(dead_code)]
pub fn classify(student_average: f64, class_average: f64, had_prior_failure: bool) -> StatusColor {
    classify_detailed(student_average, class_average, had_prior_failure).color
}

pub fn classify_detailed(
    student_average: f64,
    class_average: f64,
    had_prior_failure: bool,
) -> StatusDetail {
    let reason = |description: &str, detail: String| StatusReason {
        description: description.to_string(),
        detail,
    };

    if had_prior_failure {
        return StatusDetail {
            color: StatusColor::Red,
            reasons: vec![reason(
                "Prior failure",
                "the student has a previous failure on record".to_string(),
            )],
            note: None,
        };
    }
    if class_average == 0.0 {
        return StatusDetail {
            color: StatusColor::Green,
            reasons: vec![reason(
                "No class average",
                "the class has no average to compare against".to_string(),
            )],
            note: Some("status defaults to green until the class is graded".to_string()),
        };
    }
    if student_average >= class_average {
        return StatusDetail {
            color: StatusColor::Green,
            reasons: vec![reason(
                "At or above class average",
                format!("{:.2} >= {:.2}", student_average, class_average),
            )],
            note: None,
        };
    }
    let floor = class_average * YELLOW_FLOOR;
    if student_average >= floor {
        return StatusDetail {
            color: StatusColor::Yellow,
            reasons: vec![reason(
                "Within 10% below class average",
                format!("{:.2} is between {:.2} and {:.2}", student_average, floor, class_average),
            )],
            note: None,
        };
    }
    StatusDetail {
        color: StatusColor::Red,
        reasons: vec![reason(
            "More than 10% below class average",
            format!("{:.2} < {:.2}", student_average, floor),
        )],
        note: None,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentStatusRow {
    pub cpf: String,
    pub name: String,
    pub media_pre_final: Option<f64>,
    pub media_pos_final: Option<f64>,
    pub reprovado_por_falta: bool,
    pub status_color: Option<StatusColor>,
    pub status: StatusDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatusReport {
    pub class_id: String,
    pub class_average: f64,
    pub students: Vec<StudentStatusRow>,
}

/// Per-student status for every enrollment of `class`.
///
/// Students without a determined standing get no colour unless they carry
/// a prior failure.
pub fn class_status_report(class: &mut Class, roster: &[Student]) -> ClassStatusReport {
    let class_average = class.class_average();
    let students = class
        .enrollments()
        .iter()
        .map(|e| {
            let name = roster
                .iter()
                .find(|s| s.cpf == e.student_cpf())
                .map(|s| s.name.clone())
                .unwrap_or_default();
            let (status_color, status) = match e.media_pos_final() {
                Some(avg) => {
                    let detail = classify_detailed(avg, class_average, e.reprovado_por_falta());
                    (Some(detail.color), detail)
                }
                None if e.reprovado_por_falta() => {
                    let detail = classify_detailed(0.0, class_average, true);
                    (Some(detail.color), detail)
                }
                None => (
                    None,
                    StatusDetail {
                        color: StatusColor::Green,
                        reasons: vec![StatusReason {
                            description: "Incomplete gradebook".to_string(),
                            detail: "not every goal has been graded yet".to_string(),
                        }],
                        note: Some("no status until all goals are graded".to_string()),
                    },
                ),
            };
            StudentStatusRow {
                cpf: e.student_cpf().to_string(),
                name,
                media_pre_final: e.media_pre_final(),
                media_pos_final: e.media_pos_final(),
                reprovado_por_falta: e.reprovado_por_falta(),
                status_color,
                status,
            }
        })
        .collect();

    ClassStatusReport {
        class_id: class.id(),
        class_average,
        students,
    }
}
