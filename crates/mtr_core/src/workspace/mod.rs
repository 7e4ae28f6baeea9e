use std::fs;
use std::path::Path;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db;
use crate::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    pub db_path: String,
    pub is_empty: bool,
    /// Embedding dimension pinned by the first engine open, if any.
    pub dimension: Option<usize>,
}

fn check_path(path: &Path) -> Result<(), AppError> {
    if path.as_os_str().is_empty() {
        return Err(AppError::new("WORKSPACE_INVALID_PATH", "Workspace DB path is empty"));
    }
    if path.is_dir() {
        return Err(AppError::new(
            "WORKSPACE_INVALID_PATH",
            "Workspace DB path points at a directory",
        )
        .with_details(path.display().to_string()));
    }
    Ok(())
}

// Re-code a lower-level error, keeping its cause.
fn rewrap(code: &'static str, message: &'static str) -> impl FnOnce(AppError) -> AppError {
    move |e| {
        let cause = e.details.clone().unwrap_or_else(|| e.to_string());
        AppError::new(code, message).with_details(cause)
    }
}

fn connect(path: &Path, open_code: &'static str) -> Result<Connection, AppError> {
    let mut conn = db::open(path).map_err(rewrap(open_code, "Failed to open workspace database"))?;
    db::migrate(&mut conn).map_err(rewrap(
        "WORKSPACE_MIGRATION_FAILED",
        "Failed to migrate workspace database",
    ))?;
    Ok(conn)
}

fn describe(path: &Path, conn: &Connection) -> Result<WorkspaceMetadata, AppError> {
    let is_empty: bool = conn
        .query_row(
            "SELECT NOT EXISTS(SELECT 1 FROM chunks) AND NOT EXISTS(SELECT 1 FROM sources)",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to check workspace contents")
                .with_details(e.to_string())
        })?;
    Ok(WorkspaceMetadata {
        db_path: path.to_string_lossy().to_string(),
        is_empty,
        dimension: db::stored_dimension(conn)?,
    })
}

/// Open an existing corpus database and bring its schema up to date.
pub fn open_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    check_path(db_path)?;
    if !db_path.is_file() {
        return Err(AppError::new(
            "WORKSPACE_DB_NOT_FOUND",
            "Workspace database file not found",
        )
        .with_details(db_path.display().to_string()));
    }
    connect(db_path, "WORKSPACE_OPEN_FAILED")
}

/// Open the corpus database at `db_path`, creating it and its parent
/// directories when missing.
pub fn create_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    check_path(db_path)?;
    match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::new(
                    "WORKSPACE_CREATE_FAILED",
                    "Failed to create workspace directory",
                )
                .with_details(format!("path={}; err={}", parent.display(), e))
            })?;
        }
        _ => {}
    }
    connect(db_path, "WORKSPACE_CREATE_FAILED")
}

pub fn open_workspace(db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let conn = open_workspace_connection(db_path)?;
    describe(db_path, &conn)
}

pub fn create_workspace(db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let conn = create_workspace_connection(db_path)?;
    describe(db_path, &conn)
}

pub fn db_is_empty(db_path: &Path) -> Result<bool, AppError> {
    open_workspace(db_path).map(|meta| meta.is_empty)
}
