mod calc;
mod config;
mod db;
mod error;
mod gradebook;
mod import;
mod ipc;
mod spreadsheet;
mod status;

use std::io::{self, BufRead, Write};

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::import::{ImportSessionStore, SystemClock};

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    let fmt = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let cfg = config::Config::from_env().context("invalid configuration")?;
    let ttl = chrono::Duration::try_seconds(cfg.import_ttl_secs)
        .context("import session TTL out of range")?;
    let imports = ImportSessionStore::new(Box::new(SystemClock), ttl, cfg.max_import_sessions);
    let mut state = ipc::AppState::new(imports);

    if let Some(ws) = cfg.workspace.as_deref() {
        ipc::open_workspace(&mut state, ws)
            .with_context(|| format!("failed to open workspace {}", ws.display()))?;
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        import_ttl_secs = cfg.import_ttl_secs,
        "gradebookd ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                tracing::debug!(error = %e, "unparseable request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        tracing::debug!(id = %req.id, method = %req.method, "request");
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    Ok(())
}
