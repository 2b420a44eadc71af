mod cli;
pub mod commands;
pub mod config;
pub mod data;
pub mod error;
pub mod models;
pub mod services;
pub mod state;

use std::io::{BufWriter, Write};
use std::sync::Arc;

use clap::Parser;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use cli::{Cli, Commands};
use commands::job_commands;
use config::EngineConfig;
use error::{AppError, EngineError};
use models::progress::{self, ProgressEvent};
use services::mcp_service::McpHttpTransport;
use state::AppState;

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = if verbose { "debug" } else { "warn" };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn open_archive(config: &EngineConfig) -> Result<rusqlite::Connection, AppError> {
    match config.database_path() {
        Some(path) => {
            let conn = data::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            tracing::debug!(path = %path.display(), "job archive opened");
            Ok(conn)
        }
        None => {
            tracing::warn!("no data directory available, job archive kept in memory");
            let conn = rusqlite::Connection::open_in_memory()?;
            data::migrations::run_migrations(&conn)?;
            Ok(conn)
        }
    }
}

/// Writes one JSON line per progress event to stderr until the job drops
/// its sender.
fn forward_progress(mut events: mpsc::UnboundedReceiver<ProgressEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Ok(line) = serde_json::to_string(&json!({"progress": event})) {
                eprintln!("{line}");
            }
        }
    })
}

async fn execute(cli: Cli) -> Result<Value, AppError> {
    let config = EngineConfig::load(cli.config.as_deref())?;
    let transport = Arc::new(McpHttpTransport::new(&config.transport).map_err(EngineError::from)?);
    let db = open_archive(&config)?;

    let (progress, forwarder) = match cli.command {
        Commands::Run { .. } | Commands::Undo { .. } => {
            let (callback, events) = progress::channel();
            (Some(callback), Some(forward_progress(events)))
        }
        _ => (None, None),
    };
    let state = AppState::new(config, transport, db, progress);

    let data = match cli.command {
        Commands::Run { plan, job_id } => {
            serde_json::to_value(job_commands::run_plan(&state, &plan, job_id).await?)?
        }
        Commands::Phases { plan } => {
            serde_json::to_value(job_commands::preview_phases(&state, &plan)?)?
        }
        Commands::Undo { job_id } => {
            serde_json::to_value(job_commands::undo_job(&state, &job_id).await?)?
        }
        Commands::History { limit } => {
            serde_json::to_value(job_commands::job_history(&state, limit)?)?
        }
        Commands::Ping => job_commands::ping(&state).await?,
    };

    drop(state);
    if let Some(forwarder) = forwarder {
        let _ = forwarder.await;
    }
    Ok(data)
}

fn envelope(command: &str, result: Result<Value, AppError>) -> (Value, i32) {
    match result {
        Ok(data) => (json!({"ok": true, "command": command, "data": data}), 0),
        Err(e) => (
            json!({
                "ok": false,
                "command": command,
                "error": {"code": e.code(), "message": e.to_string()}
            }),
            1,
        ),
    }
}

fn emit_json(value: &Value) {
    let stdout = std::io::stdout();
    let mut writer = BufWriter::new(stdout.lock());
    if serde_json::to_writer(&mut writer, value).is_err() {
        return;
    }
    let _ = writer.write_all(b"\n");
    let _ = writer.flush();
}

/// Parses the command line, runs one command and prints its JSON envelope.
/// Returns the process exit code.
pub async fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) {
                e.exit();
            }
            let msg = e.to_string();
            let first_line = msg.lines().next().unwrap_or("parse error");
            emit_json(&json!({
                "ok": false,
                "command": "unknown",
                "error": {"code": "INVALID_ARGS", "message": first_line}
            }));
            return 2;
        }
    };

    init_tracing(cli.verbose);
    let command = cli.command.name();
    let (response, code) = envelope(command, execute(cli).await);
    emit_json(&response);
    code
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wraps_data() {
        let (value, code) = envelope("history", Ok(json!([])));
        assert_eq!(code, 0);
        assert_eq!(value["ok"], true);
        assert_eq!(value["command"], "history");
        assert!(value["data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn envelope_reports_error_code() {
        let (value, code) = envelope(
            "undo",
            Err(AppError::General("nothing to undo for job-1".to_string())),
        );
        assert_eq!(code, 1);
        assert_eq!(value["ok"], false);
        assert_eq!(value["error"]["code"], "GENERAL");
        assert_eq!(value["error"]["message"], "nothing to undo for job-1");
    }

    #[test]
    fn archive_created_at_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.project.database = Some(dir.path().join("nested").join("jobs.db"));
        let conn = open_archive(&config).unwrap();
        let runs = data::repository::list_job_runs(&conn, 5).unwrap();
        assert!(runs.is_empty());
        assert!(dir.path().join("nested").join("jobs.db").is_file());
    }
}
