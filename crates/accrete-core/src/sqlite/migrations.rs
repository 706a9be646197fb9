#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_registry_schema",
    // AUTOINCREMENT so row ids are never reused after a delete.
    up_sql: r#"
CREATE TABLE IF NOT EXISTS file_rows (
    row_id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name TEXT NOT NULL,
    target_path TEXT NOT NULL,
    queued INTEGER NOT NULL DEFAULT 0,
    finished_at_unix INTEGER,
    created_at_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_rows_task_name
    ON file_rows (task_name);

CREATE INDEX IF NOT EXISTS idx_file_rows_target_path
    ON file_rows (target_path);
"#,
    down_sql: r#"
DROP INDEX IF EXISTS idx_file_rows_target_path;
DROP INDEX IF EXISTS idx_file_rows_task_name;
DROP TABLE IF EXISTS file_rows;
"#,
};

const MIGRATIONS: [SqliteMigration; 1] = [MIGRATION_0001];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
