use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::error::AppResult;

const USER_VERSION: i32 = 1;

pub fn run(conn: &Connection) -> AppResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS migration_history (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;

    let mut current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version < 1 {
        info!(target: "app::db", version = current_version, "running migration v1");
        // v1 is the baseline schema created by schema.sql.
        current_version = 1;
        conn.execute(&format!("PRAGMA user_version = {}", current_version), [])?;
        record_migration(conn, 1, "Baseline: scheduling runs and placements")?;
    }

    debug_assert_eq!(current_version, USER_VERSION);
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, description: &str) -> AppResult<()> {
    conn.execute(
        r#"
            INSERT OR IGNORE INTO migration_history (version, description, applied_at)
            VALUES (?1, ?2, ?3)
        "#,
        (version, description, Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use tempfile::tempdir;

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempdir().expect("temp dir");
        let pool = DbPool::new(dir.path().join("migrate.sqlite")).expect("pool");
        // Every connection re-runs the ladder; versions settle at the latest.
        let conn = pool.get_connection().expect("conn");
        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .expect("version");
        assert_eq!(version, USER_VERSION);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM migration_history", [], |row| {
                row.get(0)
            })
            .expect("count");
        assert_eq!(rows, 1);
    }
}
