use std::collections::HashSet;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};

use crate::error::{codes, AppError};
use crate::normalize::timestamps::now_rfc3339_utc;

/// Embedded schema migrations, applied once each in this order.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../migrations/0001_init.sql"
        )),
    ),
    (
        "0002_chunk_embeddings.sql",
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../migrations/0002_chunk_embeddings.sql"
        )),
    ),
];

const META_DIMENSION: &str = "dimension";

pub fn open(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite database")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    enable_foreign_keys(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    let conn = Connection::open_in_memory().map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open in-memory SQLite database")
            .with_details(e.to_string())
    })?;
    enable_foreign_keys(&conn)?;
    Ok(conn)
}

// Cascading embedding deletes rely on this; it is per-connection in SQLite.
fn enable_foreign_keys(conn: &Connection) -> Result<(), AppError> {
    conn.pragma_update(None, "foreign_keys", 1).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to enable foreign keys")
            .with_details(e.to_string())
    })
}

fn sql_err(code: &'static str, message: String) -> impl FnOnce(rusqlite::Error) -> AppError {
    move |e| AppError::new(code, message).with_details(e.to_string())
}

fn applied_migrations(conn: &Connection) -> Result<HashSet<String>, AppError> {
    let mut stmt = conn
        .prepare("SELECT name FROM _migrations")
        .map_err(sql_err("DB_MIGRATIONS_QUERY_FAILED", "Failed to query applied migrations".into()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(sql_err("DB_MIGRATIONS_QUERY_FAILED", "Failed to read applied migrations".into()))?
        .collect::<rusqlite::Result<HashSet<String>>>()
        .map_err(sql_err("DB_MIGRATIONS_QUERY_FAILED", "Failed to decode migration row".into()))?;
    Ok(names)
}

/// Bring the schema up to date. Each pending migration runs in its own transaction.
pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(sql_err("DB_MIGRATIONS_TABLE_FAILED", "Failed to create migrations table".into()))?;

    let applied = applied_migrations(conn)?;
    for &(name, sql) in MIGRATIONS.iter().filter(|(name, _)| !applied.contains(*name)) {
        let applied_at = now_rfc3339_utc()?;
        let tx = conn
            .transaction()
            .map_err(sql_err("DB_TX_FAILED", format!("Failed to start migration {name}")))?;
        tx.execute_batch(sql)
            .map_err(sql_err("DB_MIGRATION_FAILED", format!("Migration {name} failed")))?;
        tx.execute(
            "INSERT INTO _migrations(name, applied_at) VALUES (?1, ?2)",
            [name, applied_at.as_str()],
        )
        .map_err(sql_err("DB_MIGRATION_FAILED", format!("Failed to record migration {name}")))?;
        tx.commit()
            .map_err(sql_err("DB_TX_FAILED", format!("Failed to commit migration {name}")))?;
        tracing::info!(migration = name, "applied schema migration");
    }
    Ok(())
}

pub fn stored_dimension(conn: &Connection) -> Result<Option<usize>, AppError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value FROM corpus_meta WHERE key = ?1",
            [META_DIMENSION],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| {
            AppError::new("DB_QUERY_FAILED", "Failed to read corpus dimension")
                .with_details(e.to_string())
        })?;

    match raw {
        None => Ok(None),
        Some(v) => v.parse::<usize>().map(Some).map_err(|e| {
            AppError::new("DB_CORRUPT", "Stored corpus dimension is not a number")
                .with_details(format!("value={v}; err={e}"))
        }),
    }
}

/// Pin the corpus-wide embedding dimension.
///
/// The first call records `dimension`; later calls fail with `DIMENSION_MISMATCH`
/// when the configured value disagrees with what the corpus was built with.
pub fn ensure_dimension(conn: &Connection, dimension: usize) -> Result<(), AppError> {
    match stored_dimension(conn)? {
        Some(stored) if stored == dimension => Ok(()),
        Some(stored) => Err(AppError::new(
            codes::DIMENSION_MISMATCH,
            "Configured dimension differs from the corpus dimension",
        )
        .with_details(format!("stored={stored}; configured={dimension}"))),
        None => {
            conn.execute(
                "INSERT INTO corpus_meta(key, value) VALUES (?1, ?2)",
                [META_DIMENSION, dimension.to_string().as_str()],
            )
            .map_err(|e| {
                AppError::new("DB_WRITE_FAILED", "Failed to record corpus dimension")
                    .with_details(e.to_string())
            })?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_expected_tables() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");

        for table in ["sources", "chunks", "chunk_embeddings", "corpus_meta"] {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .optional()
                .unwrap();
            assert_eq!(name.as_deref(), Some(table));
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("first");
        migrate(&mut conn).expect("second");
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn dimension_is_pinned_on_first_use() {
        let mut conn = open_in_memory().expect("open");
        migrate(&mut conn).expect("migrate");

        assert_eq!(stored_dimension(&conn).unwrap(), None);
        ensure_dimension(&conn, 3).expect("pin");
        ensure_dimension(&conn, 3).expect("same dimension");
        let err = ensure_dimension(&conn, 4).unwrap_err();
        assert!(err.is(codes::DIMENSION_MISMATCH));
        assert_eq!(stored_dimension(&conn).unwrap(), Some(3));
    }
}
