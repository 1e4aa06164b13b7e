//! SQLite-backed `RelationalStore`
//!
//! Separate reader/writer connections under their own mutexes, both tuned
//! with the same PRAGMA set so read load never
//! blocks behind the writer's WAL checkpoints.

use super::{apply_migrations, RelationalResult, RelationalStore, RelationalStoreError, StoreStats};
use crate::memory::{Filter, Memory, MetaValue, Metadata, Tier, VaultScope};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> RelationalResult<Self> {
        let path = path.as_ref();
        let writer_conn = Connection::open(path)?;
        configure_connection(&writer_conn)?;
        apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(path)?;
        configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    /// Opens a shared-cache in-memory database (same uri for both handles,
    /// so writer and reader see the same data) — used by tests and by
    /// short-lived in-process callers.
    pub fn open_in_memory() -> RelationalResult<Self> {
        use rusqlite::OpenFlags;
        let uri = format!(
            "file:memdb_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_SHARED_CACHE;

        let writer_conn = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&writer_conn)?;
        apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
        })
    }

    fn writer(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reader(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA mmap_size = 268435456;
         PRAGMA journal_size_limit = 67108864;
         PRAGMA optimize = 0x10002;",
    )
}

/// Strip FTS5 operator syntax a caller's raw query might contain, so a user
/// query like `foo"bar` or `a OR NOT b` never becomes a malformed or
/// unexpectedly-boolean MATCH expression. Tokens are re-quoted individually
/// and joined as an implicit AND.
pub fn sanitize_fts5_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|tok| {
            let cleaned: String = tok.chars().filter(|c| *c != '"').collect();
            format!("\"{cleaned}\"")
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let tier_str: String = row.get("tier")?;
    let vault_str: String = row.get("vault_scope")?;
    let metadata_json: String = row.get("metadata")?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        context: row.get("context")?,
        importance: row.get("importance")?,
        tier: Tier::parse_name(&tier_str).unwrap_or(Tier::Working),
        created_at: row.get("created_at")?,
        last_accessed_at: row.get("last_accessed_at")?,
        access_count: row.get("access_count")?,
        metadata,
        vault_scope: VaultScope::parse_name(&vault_str).unwrap_or_default(),
        pending_embedding: row.get::<_, i64>("pending_embedding")? != 0,
        quarantined: row.get::<_, i64>("quarantined")? != 0,
        consecutive_sweep_failures: row.get::<_, i64>("consecutive_sweep_failures")? as u32,
    })
}

fn meta_to_json(meta: &Metadata) -> String {
    serde_json::to_string(meta).unwrap_or_else(|_| "{}".to_string())
}

fn is_primary_key_violation(err: &rusqlite::Error) -> bool {
    use rusqlite::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::ConstraintViolation)
        }
        _ => false,
    }
}

impl RelationalStore for SqliteStore {
    fn insert(&self, memory: &Memory) -> RelationalResult<()> {
        let conn = self.writer();
        let result = conn.execute(
            "INSERT INTO memories (
                id, content, content_hash, context, importance, tier,
                created_at, last_accessed_at, access_count, metadata,
                vault_scope, pending_embedding, quarantined, consecutive_sweep_failures
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
            params![
                memory.id,
                memory.content,
                memory.content_hash,
                memory.context,
                memory.importance,
                memory.tier.as_str(),
                memory.created_at,
                memory.last_accessed_at,
                memory.access_count,
                meta_to_json(&memory.metadata),
                memory.vault_scope.as_str(),
                memory.pending_embedding as i64,
                memory.quarantined as i64,
                memory.consecutive_sweep_failures,
            ],
        );
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_primary_key_violation(&e) => {
                Err(RelationalStoreError::Conflict(memory.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: &str) -> RelationalResult<Option<Memory>> {
        let conn = self.reader();
        let mut stmt = conn.prepare("SELECT * FROM memories WHERE id = ?1")?;
        let memory = stmt
            .query_row(params![id], row_to_memory)
            .optional()?;
        Ok(memory)
    }

    fn delete(&self, id: &str) -> RelationalResult<()> {
        let conn = self.writer();
        let affected = conn.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(RelationalStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn update_tier_field(&self, id: &str, tier: Tier) -> RelationalResult<()> {
        let conn = self.writer();
        let affected = conn.execute(
            "UPDATE memories SET tier = ?1 WHERE id = ?2",
            params![tier.as_str(), id],
        )?;
        if affected == 0 {
            return Err(RelationalStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn set_pending_embedding(&self, id: &str, pending: bool) -> RelationalResult<()> {
        let conn = self.writer();
        let affected = conn.execute(
            "UPDATE memories SET pending_embedding = ?1 WHERE id = ?2",
            params![pending as i64, id],
        )?;
        if affected == 0 {
            return Err(RelationalStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn touch_batch(&self, hits: &[(String, DateTime<Utc>)]) -> RelationalResult<()> {
        let mut conn = self.writer();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
            )?;
            for (id, at) in hits {
                stmt.execute(params![at, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn exact_search(&self, query: &str, filter: &Filter, limit: usize) -> RelationalResult<Vec<Memory>> {
        let sanitized = sanitize_fts5_query(query);
        let conn = self.reader();
        let mut stmt = conn.prepare(
            "SELECT m.* FROM memories m
             JOIN memories_fts fts ON m.id = fts.id
             WHERE memories_fts MATCH ?1
               AND (?2 IS NULL OR m.context = ?2)
               AND (?3 IS NULL OR m.vault_scope = ?3)
               AND m.quarantined = 0
             ORDER BY m.importance DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![
                sanitized,
                filter.context,
                filter.vault_scope.map(|v| v.as_str().to_string()),
                limit as i64,
            ],
            row_to_memory,
        )?;
        let mut out = Vec::new();
        for r in rows {
            let m = r?;
            if let Some(tiers) = &filter.tiers {
                if !tiers.contains(&m.tier) {
                    continue;
                }
            }
            if !metadata_matches(&m, filter) {
                continue;
            }
            out.push(m);
        }
        Ok(out)
    }

    fn page_by_tier(
        &self,
        tier: Tier,
        after: Option<(DateTime<Utc>, String)>,
        limit: usize,
    ) -> RelationalResult<Vec<Memory>> {
        let conn = self.reader();
        let (after_ts, after_id) = match &after {
            Some((ts, id)) => (Some(*ts), Some(id.clone())),
            None => (None, None),
        };
        let mut stmt = conn.prepare(
            "SELECT * FROM memories
             WHERE tier = ?1
               AND quarantined = 0
               AND (?2 IS NULL OR created_at > ?2 OR (created_at = ?2 AND id > ?3))
             ORDER BY created_at ASC, id ASC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(
            params![tier.as_str(), after_ts, after_id, limit as i64],
            row_to_memory,
        )?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    fn mark_quarantined(&self, id: &str, quarantined: bool) -> RelationalResult<()> {
        let conn = self.writer();
        let affected = conn.execute(
            "UPDATE memories SET quarantined = ?1 WHERE id = ?2",
            params![quarantined as i64, id],
        )?;
        if affected == 0 {
            return Err(RelationalStoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn record_sweep_failure(&self, id: &str) -> RelationalResult<u32> {
        let conn = self.writer();
        let affected = conn.execute(
            "UPDATE memories SET consecutive_sweep_failures = consecutive_sweep_failures + 1 WHERE id = ?1",
            params![id],
        )?;
        if affected == 0 {
            return Err(RelationalStoreError::NotFound(id.to_string()));
        }
        let count: i64 = conn.query_row(
            "SELECT consecutive_sweep_failures FROM memories WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )?;
        Ok(count as u32)
    }

    fn reset_sweep_failures(&self, id: &str) -> RelationalResult<()> {
        let conn = self.writer();
        conn.execute(
            "UPDATE memories SET consecutive_sweep_failures = 0 WHERE id = ?1 AND consecutive_sweep_failures != 0",
            params![id],
        )?;
        Ok(())
    }

    fn stats(&self) -> RelationalResult<StoreStats> {
        let conn = self.reader();
        let mut stats = StoreStats::default();

        for tier in [Tier::Working, Tier::Session, Tier::LongTerm] {
            let (count, avg, oldest, newest): (i64, Option<f64>, Option<DateTime<Utc>>, Option<DateTime<Utc>>) = conn
                .query_row(
                    "SELECT COUNT(*), AVG(importance), MIN(created_at), MAX(created_at)
                     FROM memories WHERE tier = ?1",
                    params![tier.as_str()],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
                )?;
            match tier {
                Tier::Working => {
                    stats.working_count = count;
                    stats.working_avg_importance = avg.unwrap_or(0.0);
                    stats.working_oldest = oldest;
                    stats.working_newest = newest;
                }
                Tier::Session => {
                    stats.session_count = count;
                    stats.session_avg_importance = avg.unwrap_or(0.0);
                    stats.session_oldest = oldest;
                    stats.session_newest = newest;
                }
                Tier::LongTerm => {
                    stats.long_term_count = count;
                    stats.long_term_avg_importance = avg.unwrap_or(0.0);
                    stats.long_term_oldest = oldest;
                    stats.long_term_newest = newest;
                }
            }
        }

        stats.pending_embeddings = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE pending_embedding = 1",
            [],
            |r| r.get(0),
        )?;
        stats.quarantined = conn.query_row(
            "SELECT COUNT(*) FROM memories WHERE quarantined = 1",
            [],
            |r| r.get(0),
        )?;

        Ok(stats)
    }
}

fn metadata_matches(memory: &Memory, filter: &Filter) -> bool {
    filter.metadata.iter().all(|(k, v)| {
        memory
            .metadata
            .get(k)
            .map(|mv| meta_eq(mv, v))
            .unwrap_or(false)
    })
}

fn meta_eq(a: &MetaValue, b: &MetaValue) -> bool {
    match (a, b) {
        (MetaValue::Str(x), MetaValue::Str(y)) => x == y,
        (MetaValue::Int(x), MetaValue::Int(y)) => x == y,
        (MetaValue::Float(x), MetaValue::Float(y)) => (x - y).abs() < 1e-9,
        (MetaValue::Bool(x), MetaValue::Bool(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::content_hash;

    fn sample(id: &str, content: &str, tier: Tier) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            content_hash: content_hash(content),
            context: "general".to_string(),
            importance: 0.5,
            tier,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            metadata: Metadata::new(),
            vault_scope: VaultScope::Core,
            pending_embedding: true,
            quarantined: false,
            consecutive_sweep_failures: 0,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let store = SqliteStore::open_in_memory().unwrap();
        let m = sample("a", "hello there", Tier::Working);
        store.insert(&m).unwrap();
        let fetched = store.get("a").unwrap().unwrap();
        assert_eq!(fetched.content, "hello there");
        assert_eq!(fetched.tier, Tier::Working);
    }

    #[test]
    fn insert_with_colliding_id_returns_conflict() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&sample("a", "first", Tier::Working)).unwrap();
        let err = store.insert(&sample("a", "second", Tier::Working)).unwrap_err();
        assert!(matches!(err, RelationalStoreError::Conflict(id) if id == "a"));
    }

    #[test]
    fn get_missing_returns_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn exact_search_matches_fts() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&sample("a", "the quick brown fox", Tier::Working)).unwrap();
        store.insert(&sample("b", "an unrelated sentence", Tier::Working)).unwrap();
        let hits = store
            .exact_search("quick", &Filter::default(), 10)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn sanitize_strips_quotes_and_preserves_tokens() {
        let s = sanitize_fts5_query("foo\"bar baz");
        assert_eq!(s, "\"foobar\" \"baz\"");
    }

    #[test]
    fn update_tier_then_page_by_tier_reflects_change() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&sample("a", "one", Tier::Working)).unwrap();
        store.update_tier_field("a", Tier::Session).unwrap();
        let working = store.page_by_tier(Tier::Working, None, 10).unwrap();
        let session = store.page_by_tier(Tier::Session, None, 10).unwrap();
        assert!(working.is_empty());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn stats_reports_oldest_and_newest_per_tier() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut older = sample("a", "first note", Tier::Working);
        older.created_at = Utc::now() - chrono::Duration::days(2);
        store.insert(&older).unwrap();
        store.insert(&sample("b", "second note", Tier::Working)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.working_oldest, Some(older.created_at));
        assert!(stats.working_newest.unwrap() > older.created_at);
    }

    #[test]
    fn record_sweep_failure_increments_and_persists() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&sample("a", "flaky row", Tier::Working)).unwrap();
        assert_eq!(store.record_sweep_failure("a").unwrap(), 1);
        assert_eq!(store.record_sweep_failure("a").unwrap(), 2);
        assert_eq!(store.get("a").unwrap().unwrap().consecutive_sweep_failures, 2);
    }

    #[test]
    fn reset_sweep_failures_clears_counter() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert(&sample("a", "recovered row", Tier::Working)).unwrap();
        store.record_sweep_failure("a").unwrap();
        store.reset_sweep_failures("a").unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().consecutive_sweep_failures, 0);
    }

    #[test]
    fn delete_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(
            store.delete("missing"),
            Err(RelationalStoreError::NotFound(_))
        ));
    }
}
