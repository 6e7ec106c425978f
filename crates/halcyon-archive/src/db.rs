use rusqlite::{Connection, Result};

/// Initialise archive tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    create_archive_table(conn)?;
    create_fts_index(conn)?;
    create_fts_triggers(conn)?;
    create_world_model_history_table(conn)?;
    Ok(())
}

/// Primary table for evicted turns and retired world-model items
/// (spec.md §3 "Archive record").
fn create_archive_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS archive (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            session_key TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            timestamp   INTEGER NOT NULL,
            tags        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_archive_session
            ON archive(session_key, timestamp DESC);",
    )
}

/// Contentless FTS5 virtual table mirrored to `archive` via triggers
/// (spec.md §4.3: "kept in sync by triggers on insert/delete").
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS archive_fts
            USING fts5(content, content='archive', content_rowid='id');",
    )
}

fn create_fts_triggers(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TRIGGER IF NOT EXISTS archive_ai AFTER INSERT ON archive BEGIN
            INSERT INTO archive_fts(rowid, content) VALUES (new.id, new.content);
        END;
        CREATE TRIGGER IF NOT EXISTS archive_ad AFTER DELETE ON archive BEGIN
            INSERT INTO archive_fts(archive_fts, rowid, content) VALUES ('delete', old.id, old.content);
        END;",
    )
}

/// Removed world-model lines are archived here with a reason (spec.md
/// §3 "WorldModel update").
fn create_world_model_history_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS world_model_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            section     TEXT NOT NULL,
            field       TEXT NOT NULL,
            value       TEXT NOT NULL,
            reason      TEXT NOT NULL,
            removed_at  TEXT NOT NULL
        );",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_db_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        init_db(&conn).unwrap();
    }

    #[test]
    fn fts_triggers_keep_row_set_in_sync() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO archive (session_key, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params!["main:cli:main", "user", "hello world", 1000i64],
        )
        .unwrap();
        let fts_count: i64 = conn
            .query_row("SELECT count(*) FROM archive_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fts_count, 1);

        conn.execute("DELETE FROM archive WHERE id = 1", []).unwrap();
        let fts_count: i64 = conn
            .query_row("SELECT count(*) FROM archive_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fts_count, 0);
    }
}
