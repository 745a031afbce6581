use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::gradebook::Gradebook;
use crate::import::ImportSessionStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Registries loaded from the workspace; written back after each change.
    pub book: Gradebook,
    pub imports: ImportSessionStore,
}

impl AppState {
    pub fn new(imports: ImportSessionStore) -> Self {
        Self {
            workspace: None,
            db: None,
            book: Gradebook::new(),
            imports,
        }
    }
}
