use std::sync::Mutex;

use rusqlite::Connection;
use tracing::warn;

use crate::db::init_db;
use crate::error::{ArchiveError, Result};
use crate::types::{ArchiveRecord, Role, Turn};

/// Embedded full-text + exact-match store for evicted turns and retired
/// world-model items (spec.md §3, §4.3). Exclusive-open to this process;
/// the `Mutex` is the single-writer guard demanded by spec.md §5.
pub struct Archive {
    db: Mutex<Connection>,
}

impl Archive {
    /// Open (creating if absent) the archive at `path` and run [`init_db`].
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Single transactional insert of a batch. No duplication check —
    /// callers are expected to pass disjoint batches (spec.md §4.3).
    pub fn archive(&self, turns: &[Turn]) -> Result<Vec<i64>> {
        if turns.is_empty() {
            return Ok(Vec::new());
        }
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        let mut ids = Vec::with_capacity(turns.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO archive (session_key, role, content, timestamp) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for turn in turns {
                stmt.execute(rusqlite::params![
                    turn.session_key,
                    turn.role.to_string(),
                    turn.content,
                    turn.timestamp
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Attach a comma-joined tag string to already-inserted rows.
    pub fn update_tags(&self, ids: &[i64], tags: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let joined = tags.join(",");
        let db = self.db.lock().unwrap();
        for id in ids {
            db.execute(
                "UPDATE archive SET tags = ?1 WHERE id = ?2",
                rusqlite::params![joined, id],
            )?;
        }
        Ok(())
    }

    pub fn archive_world_model_item(
        &self,
        section: &str,
        field: &str,
        value: &str,
        reason: &str,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO world_model_history (section, field, value, reason, removed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![section, field, value, reason, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Exact substring scan, newest-first. Malformed LIKE patterns can't
    /// occur here (no wildcard interpolation from `q`), so this never fails.
    pub fn search_grep(&self, q: &str, limit: usize) -> Result<Vec<ArchiveRecord>> {
        let db = self.db.lock().unwrap();
        let pattern = format!("%{}%", escape_like(q));
        let mut stmt = db.prepare(
            "SELECT id, session_key, role, content, timestamp, tags FROM archive
             WHERE content LIKE ?1 ESCAPE '\\' ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![pattern, limit as i64], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Keyword rank via the FTS5 index. Malformed queries return empty,
    /// never fail (spec.md §4.3, invariant 8).
    pub fn search_bm25(&self, q: &str, limit: usize) -> Result<Vec<ArchiveRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = match db.prepare(
            "SELECT archive.id, archive.session_key, archive.role, archive.content,
                    archive.timestamp, archive.tags
             FROM archive_fts
             JOIN archive ON archive.id = archive_fts.rowid
             WHERE archive_fts MATCH ?1
             ORDER BY bm25(archive_fts) LIMIT ?2",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(query = q, error = %e, "search_bm25: malformed query, returning empty");
                return Ok(Vec::new());
            }
        };
        match stmt
            .query_map(rusqlite::params![q, limit as i64], row_to_record)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        {
            Ok(rows) => Ok(rows),
            Err(e) => {
                warn!(query = q, error = %e, "search_bm25: malformed query, returning empty");
                Ok(Vec::new())
            }
        }
    }

    /// Run grep and BM25, merge by id preserving `(BM25 first, then grep)`,
    /// dedup by id, truncate to `limit` (spec.md §4.3's only ordering
    /// contract clients may rely on).
    pub fn search_merged(&self, q: &str, limit: usize) -> Result<Vec<ArchiveRecord>> {
        let bm25 = self.search_bm25(q, limit)?;
        let grep = self.search_grep(q, limit)?;

        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::with_capacity(limit);
        for record in bm25.into_iter().chain(grep.into_iter()) {
            if seen.insert(record.id) {
                merged.push(record);
                if merged.len() >= limit {
                    break;
                }
            }
        }
        Ok(merged)
    }

    /// Newest-first turns for a session.
    pub fn get_recent_turns(&self, session_key: &str, limit: usize) -> Result<Vec<ArchiveRecord>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, session_key, role, content, timestamp, tags FROM archive
             WHERE session_key = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![session_key, limit as i64], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn read(&self, id: i64) -> Result<ArchiveRecord> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, session_key, role, content, timestamp, tags FROM archive WHERE id = ?1",
            rusqlite::params![id],
            row_to_record,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => ArchiveError::NotFound { id },
            other => ArchiveError::Database(other),
        })
    }

    /// Flush the WAL and drop the connection. spec.md §5's graceful
    /// shutdown sequence calls this after all buffers have been flushed.
    pub fn close(self) -> Result<()> {
        let db = self.db.into_inner().unwrap();
        db.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
        Ok(())
    }

    /// Same WAL flush as [`Self::close`] without consuming the handle, for
    /// callers holding this behind a shared `Arc` at shutdown.
    pub fn checkpoint(&self) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArchiveRecord> {
    let role_str: String = row.get(2)?;
    Ok(ArchiveRecord {
        id: row.get(0)?,
        session_key: row.get(1)?,
        role: role_str.parse::<Role>().unwrap_or(Role::User),
        content: row.get(3)?,
        timestamp: row.get(4)?,
        tags: row.get(5)?,
    })
}

fn escape_like(q: &str) -> String {
    q.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(session: &str, content: &str, ts: i64) -> Turn {
        Turn {
            role: Role::User,
            content: content.to_string(),
            timestamp: ts,
            session_key: session.to_string(),
        }
    }

    #[test]
    fn archive_then_read_round_trips() {
        let archive = Archive::open_in_memory().unwrap();
        let ids = archive.archive(&[turn("main:cli:main", "hello", 1000)]).unwrap();
        let record = archive.read(ids[0]).unwrap();
        assert_eq!(record.content, "hello");
    }

    #[test]
    fn search_grep_matches_substring_only() {
        let archive = Archive::open_in_memory().unwrap();
        archive
            .archive(&[turn("s", "alpha", 1), turn("s", "beta gamma", 2)])
            .unwrap();
        let hits = archive.search_grep("alpha", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "alpha");
    }

    #[test]
    fn search_bm25_malformed_query_returns_empty_not_error() {
        let archive = Archive::open_in_memory().unwrap();
        archive.archive(&[turn("s", "alpha beta", 1)]).unwrap();
        // an unbalanced quote is a syntax error for FTS5's query grammar
        let hits = archive.search_bm25("\"unterminated", 10).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_merged_orders_bm25_first_then_grep_deduped() {
        let archive = Archive::open_in_memory().unwrap();
        archive
            .archive(&[
                turn("s", "alpha", 1),
                turn("s", "alpha beta", 2),
                turn("s", "beta gamma", 3),
            ])
            .unwrap();
        let merged = archive.search_merged("alpha beta", 3).unwrap();
        // row 2 ("alpha beta") ranks first under BM25 for this query.
        assert_eq!(merged[0].content, "alpha beta");
        let ids: std::collections::HashSet<_> = merged.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), merged.len());
    }

    #[test]
    fn get_recent_turns_is_newest_first_per_session() {
        let archive = Archive::open_in_memory().unwrap();
        archive
            .archive(&[turn("a", "one", 1), turn("a", "two", 2), turn("b", "other", 3)])
            .unwrap();
        let recent = archive.get_recent_turns("a", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "two");
        assert_eq!(recent[1].content, "one");
    }

    #[test]
    fn checkpoint_does_not_consume_the_handle() {
        let archive = Archive::open_in_memory().unwrap();
        archive.archive(&[turn("a", "one", 1)]).unwrap();
        archive.checkpoint().unwrap();
        // still usable afterwards, unlike `close`
        let hits = archive.search_grep("one", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
