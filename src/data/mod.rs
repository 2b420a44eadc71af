pub mod migrations;
pub mod repository;

use std::path::Path;

use rusqlite::Connection;

use crate::error::AppError;

/// Opens the job archive at `path`, creating it and its directory if needed.
pub fn open(path: &Path) -> Result<Connection, AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    migrations::run_migrations(&conn)?;
    Ok(conn)
}
