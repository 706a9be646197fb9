use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, params};

use crate::models::{EngineError, EngineErrorKind, FileRow, RowId};
use crate::persistence::{PersistenceResult, RowStore};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "accrete_schema_migrations";

pub struct SqliteRowStore {
    database_path: PathBuf,
}

impl SqliteRowStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    pub fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(storage_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // Re-apply DDL so a recorded version with missing tables
                // heals itself; all statements are IF NOT EXISTS.
                for version in 1..=target_version {
                    if let Some(entry) = migration(version) {
                        connection.execute_batch(entry.up_sql)?;
                    }
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    if let Some(entry) = migration(version) {
                        apply_up_migration(connection, entry)?;
                    }
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    if let Some(entry) = migration(version) {
                        apply_down_migration(connection, entry)?;
                    }
                }
            }

            Ok(())
        })
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| storage_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| storage_error(operation_name, error))
    }
}

impl RowStore for SqliteRowStore {
    fn insert(
        &self,
        task_name: &str,
        target_path: &Path,
        queued: bool,
    ) -> PersistenceResult<RowId> {
        let id = self.with_connection("insert", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "
INSERT INTO file_rows (task_name, target_path, queued, finished_at_unix, created_at_unix)
VALUES (?1, ?2, ?3, NULL, strftime('%s', 'now'))
",
                params![
                    task_name,
                    target_path.to_string_lossy().to_string(),
                    bool_to_sqlite(queued),
                ],
            )?;
            Ok(connection.last_insert_rowid())
        })?;

        if id <= 0 {
            return Err(storage_error_text(
                "insert",
                "registry did not return a row id",
            ));
        }
        Ok(RowId(id as u64))
    }

    fn get(&self, task_name: &str, id: RowId) -> PersistenceResult<Option<FileRow>> {
        self.with_connection("get", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT row_id, task_name, target_path, queued, finished_at_unix, created_at_unix
FROM file_rows
WHERE task_name = ?1 AND row_id = ?2
",
            )?;
            let mut rows = statement.query(params![task_name, row_id_to_i64(id)?])?;
            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            Ok(Some(map_row(row)?))
        })
    }

    fn list_by_name(&self, task_name: &str) -> PersistenceResult<Vec<FileRow>> {
        self.with_connection("list_by_name", |connection| {
            ensure_schema_ready(connection)?;
            let mut statement = connection.prepare(
                "
SELECT row_id, task_name, target_path, queued, finished_at_unix, created_at_unix
FROM file_rows
WHERE task_name = ?1
ORDER BY row_id
",
            )?;
            let rows = statement.query_map(params![task_name], map_row)?;
            rows.collect()
        })
    }

    fn delete(&self, task_name: &str, id: RowId) -> PersistenceResult<()> {
        self.with_connection("delete", |connection| {
            ensure_schema_ready(connection)?;
            connection.execute(
                "DELETE FROM file_rows WHERE task_name = ?1 AND row_id = ?2",
                params![task_name, row_id_to_i64(id)?],
            )?;
            Ok(())
        })
    }

    fn mark_finished(&self, id: RowId, at: SystemTime) -> PersistenceResult<()> {
        self.with_connection("mark_finished", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "UPDATE file_rows SET finished_at_unix = ?2 WHERE row_id = ?1",
                params![row_id_to_i64(id)?, to_unix_seconds(at)?],
            )?;
            if updated == 0 {
                return Err(storage_error_sqlite("row id was not found for update"));
            }
            Ok(())
        })
    }

    fn merge_finished_duplicates(
        &self,
        target_path: &Path,
        keep: RowId,
    ) -> PersistenceResult<usize> {
        self.with_connection("merge_finished_duplicates", |connection| {
            ensure_schema_ready(connection)?;
            let deleted = connection.execute(
                "
DELETE FROM file_rows
WHERE target_path = ?1
  AND finished_at_unix IS NOT NULL
  AND row_id != ?2
",
                params![
                    target_path.to_string_lossy().to_string(),
                    row_id_to_i64(keep)?
                ],
            )?;
            Ok(deleted)
        })
    }

    fn task_names(
        &self,
        include_finished: bool,
        include_non_queued: bool,
    ) -> PersistenceResult<Vec<String>> {
        self.with_connection("task_names", |connection| {
            ensure_schema_ready(connection)?;
            let mut sql = String::from("SELECT DISTINCT task_name FROM file_rows WHERE 1 = 1");
            if !include_finished {
                sql.push_str(" AND finished_at_unix IS NULL");
            }
            if !include_non_queued {
                sql.push_str(" AND queued = 1");
            }
            sql.push_str(" ORDER BY task_name");

            let mut statement = connection.prepare(&sql)?;
            let rows = statement.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRow> {
    let id_raw: i64 = row.get(0)?;
    let task_name: String = row.get(1)?;
    let target_path: String = row.get(2)?;
    let queued_int: i64 = row.get(3)?;
    let finished_at_unix: Option<i64> = row.get(4)?;
    let created_at_unix: i64 = row.get(5)?;

    Ok(FileRow {
        id: RowId(i64_to_u64(id_raw)?),
        task_name,
        target_path: PathBuf::from(target_path),
        queued: sqlite_to_bool(queued_int),
        finished_at: finished_at_unix.map(from_unix_seconds).transpose()?,
        created_at: from_unix_seconds(created_at_unix)?,
    })
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))?;
    Ok(())
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    let version = read_current_version(connection)?;
    if version <= 0 {
        return Err(storage_error_sqlite(
            "database schema is not initialized; apply migrations before registry operations",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()?;
    Ok(())
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()?;
    Ok(())
}

fn storage_error(operation: &str, error: rusqlite::Error) -> EngineError {
    storage_error_text(operation, error.to_string())
}

fn storage_error_text(operation: &str, message: impl AsRef<str>) -> EngineError {
    EngineError::new(
        EngineErrorKind::StorageFailure,
        format!("sqlite registry '{operation}' failed: {}", message.as_ref()),
    )
}

fn storage_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn bool_to_sqlite(value: bool) -> i64 {
    if value { 1 } else { 0 }
}

fn sqlite_to_bool(value: i64) -> bool {
    value != 0
}

fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        storage_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| storage_error_sqlite("unix timestamp seconds exceed i64 range"))
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    if value < 0 {
        return Err(storage_error_sqlite(
            "negative unix timestamps are not supported",
        ));
    }
    let seconds = u64::try_from(value)
        .map_err(|_| storage_error_sqlite("failed to convert unix timestamp to u64"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn row_id_to_i64(value: RowId) -> rusqlite::Result<i64> {
    i64::try_from(value.0).map_err(|_| storage_error_sqlite("row id exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| storage_error_sqlite("negative row id in sqlite record"))
}
