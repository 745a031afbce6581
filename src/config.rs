use anyhow::Context;
use std::path::PathBuf;

const DEFAULT_IMPORT_TTL_SECS: i64 = 30 * 60;
const MAX_IMPORT_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_MAX_IMPORT_SESSIONS: usize = 256;

/// Process settings read from the environment at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub import_ttl_secs: i64,
    pub max_import_sessions: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            import_ttl_secs: DEFAULT_IMPORT_TTL_SECS,
            max_import_sessions: DEFAULT_MAX_IMPORT_SESSIONS,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();
        if let Some(v) = lookup("GRADEBOOKD_WORKSPACE").filter(|v| !v.trim().is_empty()) {
            cfg.workspace = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = lookup("GRADEBOOKD_IMPORT_TTL_SECS") {
            let ttl: i64 = v
                .trim()
                .parse()
                .with_context(|| format!("GRADEBOOKD_IMPORT_TTL_SECS is not an integer: {v}"))?;
            if !(0..=MAX_IMPORT_TTL_SECS).contains(&ttl) {
                anyhow::bail!(
                    "GRADEBOOKD_IMPORT_TTL_SECS must be between 0 and {MAX_IMPORT_TTL_SECS}"
                );
            }
            cfg.import_ttl_secs = ttl;
        }
        if let Some(v) = lookup("GRADEBOOKD_MAX_IMPORT_SESSIONS") {
            cfg.max_import_sessions = v.trim().parse().with_context(|| {
                format!("GRADEBOOKD_MAX_IMPORT_SESSIONS is not an integer: {v}")
            })?;
        }
        Ok(cfg)
    }
}
