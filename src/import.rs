use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::calc::{Conceito, GradeSpecification, FINAL_GOAL};
use crate::error::{GradebookError, GradebookResult};
use crate::gradebook::{clean_cpf, Class, Gradebook};
use crate::spreadsheet::{file_sha256, Row, SpreadsheetReader};

pub const CPF_COLUMN: &str = "cpf";

/// Source of "now" for session expiry.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct ImportSession {
    pub class_id: String,
    pub file_name: String,
    pub file_sha256: String,
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub created_at: DateTime<Utc>,
}

/// Parsed uploads waiting for their column mapping, keyed by token.
pub struct ImportSessionStore {
    clock: Box<dyn Clock>,
    ttl: Duration,
    max_sessions: usize,
    sessions: HashMap<String, ImportSession>,
}

impl ImportSessionStore {
    pub fn new(clock: Box<dyn Clock>, ttl: Duration, max_sessions: usize) -> Self {
        Self {
            clock,
            ttl,
            max_sessions: max_sessions.max(1),
            sessions: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    fn is_expired(&self, session: &ImportSession, now: DateTime<Utc>) -> bool {
        now - session.created_at >= self.ttl
    }

    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now - s.created_at < ttl);
        before - self.sessions.len()
    }

    /// Registers a parsed upload and returns its fresh token.
    pub fn insert(
        &mut self,
        class_id: &str,
        file_name: &str,
        file_sha256: &str,
        headers: Vec<String>,
        rows: Vec<Row>,
    ) -> String {
        let purged = self.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired import sessions dropped");
        }
        while self.sessions.len() >= self.max_sessions {
            let Some(oldest) = self
                .sessions
                .iter()
                .min_by_key(|(_, s)| s.created_at)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            tracing::warn!(token = %oldest, "import session cap reached; evicting oldest");
            self.sessions.remove(&oldest);
        }

        let token = Uuid::new_v4().to_string();
        self.sessions.insert(
            token.clone(),
            ImportSession {
                class_id: class_id.to_string(),
                file_name: file_name.to_string(),
                file_sha256: file_sha256.to_string(),
                headers,
                rows,
                created_at: self.clock.now(),
            },
        );
        token
    }

    /// Looks a live session up without consuming it. An expired session is
    /// dropped on the way out.
    pub fn get(&mut self, token: &str) -> GradebookResult<&ImportSession> {
        let now = self.clock.now();
        let expired = match self.sessions.get(token) {
            None => {
                return Err(GradebookError::not_found(
                    "Import session not found; upload the file again",
                ))
            }
            Some(session) => self.is_expired(session, now),
        };
        if expired {
            self.sessions.remove(token);
            return Err(GradebookError::not_found(
                "Import session expired; upload the file again",
            ));
        }
        self.sessions
            .get(token)
            .ok_or_else(|| GradebookError::not_found("Import session not found"))
    }

    /// Removes and returns the session. A token is usable once.
    pub fn take(&mut self, token: &str) -> GradebookResult<ImportSession> {
        self.get(token)?;
        self.sessions
            .remove(token)
            .ok_or_else(|| GradebookError::not_found("Import session not found"))
    }
}

/// Phase-1 response body.
#[derive(Debug, Clone, Serialize)]
pub struct ImportUpload {
    pub session_string: String,
    pub file_columns: Vec<String>,
    pub mapping_columns: Vec<String>,
    pub file_name: String,
    pub file_sha256: String,
}

/// Targets a file column may be mapped to for a class.
pub fn mapping_columns(spec: &GradeSpecification) -> Vec<String> {
    std::iter::once(CPF_COLUMN)
        .chain(spec.required_goals())
        .chain(std::iter::once(FINAL_GOAL))
        .map(str::to_string)
        .collect()
}

/// Phase 1: parse the file and park it under a new session token.
pub fn begin_import(
    book: &Gradebook,
    sessions: &mut ImportSessionStore,
    class_id: &str,
    file_path: &Path,
) -> GradebookResult<ImportUpload> {
    let class = book
        .find_class(class_id)
        .ok_or_else(|| GradebookError::not_found("Class not Found"))?;

    let reader = SpreadsheetReader::for_path(file_path)?;
    reader.verify_content()?;
    let headers = reader.columns()?;
    let rows = reader.process()?;
    let digest = file_sha256(file_path)?;
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let row_count = rows.len();
    let token = sessions.insert(class_id, &file_name, &digest, headers.clone(), rows);
    tracing::info!(
        class_id,
        file = %file_name,
        rows = row_count,
        sha256 = %digest,
        "grade import session opened"
    );

    Ok(ImportUpload {
        session_string: token,
        file_columns: headers,
        mapping_columns: mapping_columns(class.specification()),
        file_name,
        file_sha256: digest,
    })
}

fn validate_mapping(
    mapping: &BTreeMap<String, String>,
    headers: &[String],
    spec: &GradeSpecification,
) -> GradebookResult<()> {
    let allowed = mapping_columns(spec);
    let mut targets = HashSet::new();
    for (column, target) in mapping {
        if !headers.iter().any(|h| h == column) {
            return Err(GradebookError::validation(format!(
                "unknown file column '{}'",
                column
            )));
        }
        if !allowed.iter().any(|a| a == target) {
            return Err(GradebookError::validation(format!(
                "unknown mapping target '{}' for column '{}'",
                target, column
            )));
        }
        if !targets.insert(target.as_str()) {
            return Err(GradebookError::validation(format!(
                "mapping target '{}' is used more than once",
                target
            )));
        }
    }
    if !targets.contains(CPF_COLUMN) {
        return Err(GradebookError::validation(
            "mapping must include a cpf column",
        ));
    }
    Ok(())
}

/// Renames mapped columns to their targets and drops the rest. Every mapped
/// column is a known header, so a missing cell only comes from a short row.
fn normalize_row(row: &Row, mapping: &BTreeMap<String, String>) -> Row {
    mapping
        .iter()
        .map(|(column, target)| {
            let value = row.get(column).cloned().unwrap_or_default();
            let value = if target == CPF_COLUMN {
                clean_cpf(&value)
            } else {
                value
            };
            (target.clone(), value)
        })
        .collect()
}

type PlannedChange = (String, Vec<(String, Option<Conceito>)>);

/// Checks every row against the class and turns it into evaluation changes.
fn plan_changes(
    class: &Class,
    session: &ImportSession,
    mapping: &BTreeMap<String, String>,
    normalized: &[Row],
) -> GradebookResult<Vec<PlannedChange>> {
    let cpf_column = mapping
        .iter()
        .find(|(_, target)| target.as_str() == CPF_COLUMN)
        .map(|(column, _)| column.as_str())
        .unwrap_or(CPF_COLUMN);

    let mut plan = Vec::with_capacity(normalized.len());
    for (raw, row) in session.rows.iter().zip(normalized) {
        let cpf = row.get(CPF_COLUMN).cloned().unwrap_or_default();
        if !class.is_enrolled(&cpf) {
            let cell = raw.get(cpf_column).map(String::as_str).unwrap_or_default();
            return Err(GradebookError::not_found(format!(
                "Student with CPF {} (cell '{}') is not enrolled in class {}",
                cpf,
                cell,
                class.id()
            )));
        }
        let mut changes = Vec::new();
        for (goal, value) in row.iter().filter(|(k, _)| k.as_str() != CPF_COLUMN) {
            let grade = if value.is_empty() {
                None
            } else {
                Some(value.parse::<Conceito>().map_err(|_| {
                    GradebookError::validation(format!(
                        "Invalid grade '{}' for goal '{}' (CPF {})",
                        value, goal, cpf
                    ))
                })?)
            };
            changes.push((goal.clone(), grade));
        }
        plan.push((cpf, changes));
    }
    Ok(plan)
}

/// Phase 2: map, validate every row, then apply all of them.
///
/// Nothing is written unless every row passes. A rejected request leaves
/// the session in place so the caller can retry with a corrected mapping;
/// the session is consumed only by a successful apply.
pub fn apply_import(
    book: &mut Gradebook,
    sessions: &mut ImportSessionStore,
    class_id: &str,
    token: &str,
    mapping: &BTreeMap<String, String>,
) -> GradebookResult<Vec<Row>> {
    let class = book.class_mut(class_id)?;
    let session = sessions.get(token)?;
    if session.class_id != class_id {
        return Err(GradebookError::not_found(
            "Import session not found for this class",
        ));
    }
    validate_mapping(mapping, &session.headers, class.specification())?;

    let normalized: Vec<Row> = session
        .rows
        .iter()
        .map(|row| normalize_row(row, mapping))
        .collect();
    let plan = plan_changes(class, session, mapping, &normalized)?;

    for (cpf, changes) in plan {
        for (goal, grade) in changes {
            match grade {
                Some(g) => class.add_or_update_evaluation(&cpf, &goal, g)?,
                None => {
                    class.remove_evaluation(&cpf, &goal)?;
                }
            }
        }
    }

    let session = sessions.take(token)?;
    tracing::info!(
        class_id,
        file = %session.file_name,
        sha256 = %session.file_sha256,
        rows = normalized.len(),
        "grade import applied"
    );
    Ok(normalized)
}
