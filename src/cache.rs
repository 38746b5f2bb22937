// SQLite-backed quote cache.
//
// The persistence collaborator for the refresh orchestrator: one upsert
// table of last-seen display fields per (owner, code). Best-effort and
// eventually consistent; nothing in the engine depends on reads from it.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};

/// Sink for resolved display fields. The orchestrator invokes this once per
/// successful quote, off the result-collection path.
pub trait QuoteCache: Send + Sync {
    fn update_cached_quote(
        &self,
        owner_id: i64,
        code: &str,
        name: &str,
        value: &str,
        change_percent: &str,
    ) -> Result<()>;
}

/// One cached row, as last written.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedQuote {
    pub code: String,
    pub name: String,
    pub value: String,
    pub change_percent: String,
}

pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open (or create) the cache database at `path` and ensure the table
    /// exists. Pass `":memory:"` for an ephemeral database (useful in tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open quote cache at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set quote cache pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS quote_cache (
                owner_id       INTEGER NOT NULL,
                code           TEXT NOT NULL,
                name           TEXT NOT NULL,
                value          TEXT NOT NULL,
                change_percent TEXT NOT NULL,
                updated_at     TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
                PRIMARY KEY (owner_id, code)
            );
            ",
        )
        .context("failed to create quote cache schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Acquire the connection. Panics if the mutex is poisoned (another
    /// thread panicked while holding it).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("quote cache mutex poisoned")
    }

    /// Read back all cached rows for an owner, ordered by code.
    pub fn cached(&self, owner_id: i64) -> Result<Vec<CachedQuote>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT code, name, value, change_percent
                 FROM quote_cache WHERE owner_id = ?1 ORDER BY code",
            )
            .context("failed to prepare cache read")?;

        let rows = stmt
            .query_map(params![owner_id], |row| {
                Ok(CachedQuote {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    value: row.get(2)?,
                    change_percent: row.get(3)?,
                })
            })
            .context("failed to query quote cache")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read cached quote row")?);
        }
        Ok(out)
    }
}

impl QuoteCache for SqliteCache {
    fn update_cached_quote(
        &self,
        owner_id: i64,
        code: &str,
        name: &str,
        value: &str,
        change_percent: &str,
    ) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO quote_cache (owner_id, code, name, value, change_percent, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
                 ON CONFLICT(owner_id, code) DO UPDATE SET
                     name = excluded.name,
                     value = excluded.value,
                     change_percent = excluded.change_percent,
                     updated_at = excluded.updated_at",
                params![owner_id, code, name, value, change_percent],
            )
            .with_context(|| format!("failed to upsert cached quote for {code}"))?;
        Ok(())
    }
}
