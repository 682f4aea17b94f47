//! SQLite persistence for audit rows and webhook delivery records.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::{params, Connection, OptionalExtension};

use walletbridge_types::{AuditRow, TxnSource};

/// Result of one delivery attempt, decided inside a single transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// First sighting of this idempotency key; the audit row was written.
    Recorded,
    /// Same key, same payload hash: a retry, nothing changed.
    Deduped,
    /// Same key, different payload hash: caller error.
    KeyConflict,
}

/// Blocking store handle; clone freely, call from `spawn_blocking`.
#[derive(Clone)]
pub struct AuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl AuditStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("open audit database")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Record one delivery: delivery-record insert, hash comparison on
    /// replay, create-only audit row. All inside one transaction so a
    /// crash can never leave a delivery without its row.
    pub fn ingest(
        &self,
        key: &str,
        payload_hash: &str,
        row: &AuditRow,
    ) -> anyhow::Result<IngestOutcome> {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction().context("begin ingest transaction")?;

        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO webhook_deliveries (key, payload_hash) VALUES (?1, ?2)",
                params![key, payload_hash],
            )
            .context("insert delivery record")?;
        if inserted == 0 {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT payload_hash FROM webhook_deliveries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .context("read delivery record")?;
            return Ok(match existing.as_deref() {
                Some(hash) if hash == payload_hash => IngestOutcome::Deduped,
                _ => IngestOutcome::KeyConflict,
            });
        }

        // Create-only: an existing audit row wins, fields are never updated.
        tx.execute(
            "INSERT OR IGNORE INTO audit_log
             (txn_id, user_id, delta, actor, source, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.txn_id,
                row.user_id,
                row.delta,
                row.actor,
                row.source.as_str(),
                row.reason,
                row.created_at,
            ],
        )
        .context("insert audit row")?;

        tx.commit().context("commit ingest transaction")?;
        Ok(IngestOutcome::Recorded)
    }

    /// Latest rows, newest first, optionally filtered by user.
    pub fn query(&self, user_id: Option<&str>, limit: u32) -> anyhow::Result<Vec<AuditRow>> {
        let limit = limit.clamp(1, 100);
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows = Vec::new();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<AuditRow> {
            let source: String = row.get(4)?;
            Ok(AuditRow {
                txn_id: row.get(0)?,
                user_id: row.get(1)?,
                delta: row.get(2)?,
                actor: row.get(3)?,
                source: parse_source(&source),
                reason: row.get(5)?,
                created_at: row.get(6)?,
            })
        };
        match user_id {
            Some(user_id) => {
                let mut stmt = conn.prepare(
                    "SELECT txn_id, user_id, delta, actor, source, reason, created_at
                     FROM audit_log WHERE user_id = ?1 ORDER BY rowid DESC LIMIT ?2",
                )?;
                let mapped = stmt.query_map(params![user_id, limit], map_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT txn_id, user_id, delta, actor, source, reason, created_at
                     FROM audit_log ORDER BY rowid DESC LIMIT ?1",
                )?;
                let mapped = stmt.query_map(params![limit], map_row)?;
                for row in mapped {
                    rows.push(row?);
                }
            }
        }
        Ok(rows)
    }
}

fn parse_source(raw: &str) -> TxnSource {
    match raw {
        "discord" => TxnSource::Discord,
        _ => TxnSource::Game,
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         CREATE TABLE IF NOT EXISTS webhook_deliveries (
             key TEXT PRIMARY KEY,
             payload_hash TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS audit_log (
             txn_id TEXT PRIMARY KEY,
             user_id TEXT NOT NULL,
             delta INTEGER NOT NULL,
             actor TEXT NOT NULL,
             source TEXT NOT NULL,
             reason TEXT,
             created_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_audit_log_user ON audit_log (user_id);",
    )
    .context("init audit schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(txn_id: &str, user_id: &str, delta: i64) -> AuditRow {
        AuditRow {
            txn_id: txn_id.to_string(),
            user_id: user_id.to_string(),
            delta,
            actor: "ops".to_string(),
            source: TxnSource::Discord,
            reason: None,
            created_at: "2024-05-01T12:00:00.000Z".to_string(),
        }
    }

    fn memory_store() -> AuditStore {
        AuditStore::open(Path::new(":memory:")).unwrap()
    }

    #[test]
    fn records_then_dedupes_same_key_and_hash() {
        let store = memory_store();
        let first = store.ingest("k-1", "hash-a", &row("t-1", "u-1", 5)).unwrap();
        assert_eq!(first, IngestOutcome::Recorded);
        let second = store.ingest("k-1", "hash-a", &row("t-1", "u-1", 5)).unwrap();
        assert_eq!(second, IngestOutcome::Deduped);
        assert_eq!(store.query(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn same_key_different_hash_conflicts() {
        let store = memory_store();
        store.ingest("k-1", "hash-a", &row("t-1", "u-1", 5)).unwrap();
        let outcome = store.ingest("k-1", "hash-b", &row("t-2", "u-1", 7)).unwrap();
        assert_eq!(outcome, IngestOutcome::KeyConflict);
        assert_eq!(store.query(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn audit_rows_are_create_only() {
        let store = memory_store();
        store.ingest("k-1", "hash-a", &row("t-1", "u-1", 5)).unwrap();
        // A second delivery of the same txn under a new key must not
        // rewrite the original row.
        store.ingest("k-2", "hash-b", &row("t-1", "u-1", 999)).unwrap();
        let rows = store.query(None, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].delta, 5);
    }

    #[test]
    fn query_filters_and_caps() {
        let store = memory_store();
        for i in 0..150 {
            let user = if i % 2 == 0 { "u-even" } else { "u-odd" };
            store
                .ingest(
                    &format!("k-{i}"),
                    &format!("hash-{i}"),
                    &row(&format!("t-{i}"), user, i),
                )
                .unwrap();
        }
        let all = store.query(None, 500).unwrap();
        assert_eq!(all.len(), 100);
        // Newest first.
        assert_eq!(all[0].txn_id, "t-149");

        let even = store.query(Some("u-even"), 10).unwrap();
        assert_eq!(even.len(), 10);
        assert!(even.iter().all(|r| r.user_id == "u-even"));
        assert_eq!(even[0].txn_id, "t-148");
    }
}
