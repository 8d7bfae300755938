//! §4.4 CommandLog. Grounded on `commands/persistence.rs`'s `tool_call`
//! table (`id, tool, args_json, created_at`) rather than the teacher's
//! separate tamper-evident `action_log` hash-chain — the spec's
//! `PersistedCommand` row is exactly the simpler shape and never asks for
//! chain verification (see DESIGN.md).

use crate::config::errors as codes;
use crate::config::limits::REPLAY_YIELD_EVERY;
use crate::envelope::{Envelope, Op};
use crate::error::{AdapterError, Result};
use crate::telemetry::{Telemetry, TelemetryEvent};
use async_trait::async_trait;
use chrono::Utc;
use tokio_rusqlite::params;
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// One row as persisted and replayed (§3 `PersistedCommand`, §6 wire shape).
#[derive(Debug, Clone)]
pub struct PersistedCommand {
    pub id: String,
    pub tool: String,
    pub args: Value,
    pub created_at: i64,
}

/// Storage bridge contract (§6, external): the concrete SQLite
/// implementation is the default, but the log is generic over any
/// `CommandStore` so embedders can swap persistence.
#[async_trait]
pub trait CommandStore: Send + Sync {
    async fn insert(&self, row: PersistedCommand) -> Result<()>;
    async fn load_ordered(&self) -> Result<Vec<PersistedCommand>>;
    async fn delete_for_window(&self, window_id: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// Default `CommandStore`, following the teacher's `db_rw`/`db_ro` split
/// pattern (`core::AppState`) collapsed to a single pooled connection
/// since this crate has no multi-writer contention to split for.
pub struct SqliteCommandStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteCommandStore {
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| AdapterError::internal(format!("sqlite open failed: {e}")))?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS tool_call (
                    id TEXT PRIMARY KEY,
                    tool TEXT NOT NULL,
                    args_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )",
            )
            .map_err(tokio_rusqlite::Error::from)
        })
        .await
        .map_err(|e| AdapterError::internal(format!("sqlite migrate failed: {e}")))?;
        Ok(SqliteCommandStore { conn })
    }

    pub async fn in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| AdapterError::internal(format!("sqlite open failed: {e}")))?;
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS tool_call (
                    id TEXT PRIMARY KEY,
                    tool TEXT NOT NULL,
                    args_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )",
            )
            .map_err(tokio_rusqlite::Error::from)
        })
        .await
        .map_err(|e| AdapterError::internal(format!("sqlite migrate failed: {e}")))?;
        Ok(SqliteCommandStore { conn })
    }
}

#[async_trait]
impl CommandStore for SqliteCommandStore {
    async fn insert(&self, row: PersistedCommand) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO tool_call (id, tool, args_json, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params![row.id, row.tool, row.args.to_string(), row.created_at],
                )
                .map(|_| ())
                .map_err(tokio_rusqlite::Error::from)
            })
            .await
            .map_err(|e| AdapterError::validation(codes::PERSISTENCE_WRITE_FAILED, e.to_string()))
    }

    async fn load_ordered(&self) -> Result<Vec<PersistedCommand>> {
        self.conn
            .call(|conn| -> tokio_rusqlite::Result<Vec<PersistedCommand>> {
                let mut stmt = conn
                    .prepare("SELECT id, tool, args_json, created_at FROM tool_call ORDER BY created_at ASC, rowid ASC")
                    .map_err(tokio_rusqlite::Error::from)?;
                let rows = stmt
                    .query_map([], |row| {
                        let id: String = row.get(0)?;
                        let tool: String = row.get(1)?;
                        let args_json: String = row.get(2)?;
                        let created_at: i64 = row.get(3)?;
                        let args: Value = serde_json::from_str(&args_json)
                            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
                        Ok(PersistedCommand { id, tool, args, created_at })
                    })
                    .map_err(tokio_rusqlite::Error::from)?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(tokio_rusqlite::Error::from)?;
                Ok(rows)
            })
            .await
            .map_err(|e| AdapterError::validation(codes::PERSISTENCE_READ_FAILED, e.to_string()))
    }

    async fn delete_for_window(&self, window_id: &str) -> Result<()> {
        let window_id = window_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM tool_call WHERE
                        (tool = 'window.create' AND json_extract(args_json, '$.id') = ?1)
                        OR json_extract(args_json, '$.windowId') = ?1",
                    params![window_id],
                )
                .map(|_| ())
                .map_err(tokio_rusqlite::Error::from)
            })
            .await
            .map_err(|e| AdapterError::validation(codes::PERSISTENCE_CLEAR_FAILED, e.to_string()))
    }

    async fn clear(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM tool_call", [])
                    .map(|_| ())
                    .map_err(tokio_rusqlite::Error::from)
            })
            .await
            .map_err(|e| AdapterError::validation(codes::PERSISTENCE_CLEAR_FAILED, e.to_string()))
    }
}

/// One replayed row, ready for the orchestrator (§4.4 `replayAll`).
pub struct ReplayItem {
    pub run_id: String,
    pub envelope: Envelope,
}

pub struct CommandLog<S: CommandStore> {
    store: S,
    telemetry: Telemetry,
}

impl<S: CommandStore> CommandLog<S> {
    pub fn new(store: S, telemetry: Telemetry) -> Self {
        CommandLog { store, telemetry }
    }

    /// §4.4: "skip if op is ephemeral. Otherwise write (id = idempotencyKey
    /// ∥ cmd.id ∥ fresh, tool = op, args = params). Best-effort: failure
    /// logs and returns without throwing."
    pub async fn persist(&self, env: &Envelope) {
        if env.op.is_ephemeral() {
            return;
        }
        let id = env
            .idempotency_key
            .clone()
            .or_else(|| env.id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let args = serde_json::to_value(&env.op)
            .ok()
            .and_then(|v| v.get("params").cloned())
            .unwrap_or(Value::Null);
        let row = PersistedCommand {
            id,
            tool: env.op.name().to_string(),
            args,
            created_at: Utc::now().timestamp_millis(),
        };
        if let Err(err) = self.store.insert(row).await {
            #[cfg(feature = "otel_spans")]
            tracing::warn!(target = "uicp", error = %err, "command persist failed");
            #[cfg(not(feature = "otel_spans"))]
            let _ = err;
        }
    }

    /// `clear(windowId?)`: all rows, or only rows referencing `windowId`.
    pub async fn clear(&self, window_id: Option<&str>) -> Result<()> {
        match window_id {
            Some(id) => self.store.delete_for_window(id).await,
            None => self.store.clear().await,
        }
    }

    /// §4.4 `replayAll` flow: fetch in insertion order, dedupe by
    /// `(tool, canonicalJson(args))` within this replay, synthesise an
    /// envelope per row with `idempotencyKey = id`, preserving order.
    pub fn replay_items(&self, rows: Vec<PersistedCommand>) -> Result<Vec<ReplayItem>> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let dedupe_key = format!("{}:{}", row.tool, crate::canonical::stable_stringify(&row.args));
            if !seen.insert(dedupe_key) {
                continue;
            }
            let envelope_json = serde_json::json!({
                "op": row.tool,
                "params": row.args,
                "idempotencyKey": row.id,
            });
            let envelope: Envelope = serde_json::from_value(envelope_json)
                .map_err(|e| AdapterError::internal(format!("replay row {} is not a valid envelope: {e}", row.id)))?;
            items.push(ReplayItem {
                run_id: envelope
                    .idempotency_key
                    .clone()
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                envelope,
            });
        }
        Ok(items)
    }

    pub async fn load_for_replay(&self) -> Result<Vec<ReplayItem>> {
        let rows = self.store.load_ordered().await?;
        self.replay_items(rows)
    }

    pub fn emit_progress(&self, total: usize, processed: usize, applied: usize, errors: usize) {
        if processed == total || processed % REPLAY_YIELD_EVERY == 0 {
            self.telemetry.emit(TelemetryEvent::WorkspaceReplayProgress {
                total,
                processed,
                applied,
                errors,
            });
        }
    }

    pub fn emit_complete(&self, total: usize, processed: usize, applied: usize, errors: usize) {
        self.telemetry.emit(TelemetryEvent::WorkspaceReplayComplete {
            total,
            processed,
            applied,
            errors,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::WindowCreateParams;

    async fn log() -> CommandLog<SqliteCommandStore> {
        let store = SqliteCommandStore::in_memory().await.unwrap();
        CommandLog::new(store, Telemetry::new())
    }

    fn window_create_envelope(id: &str, idempotency_key: &str) -> Envelope {
        let mut env = Envelope::new(Op::WindowCreate(WindowCreateParams {
            id: id.to_string(),
            ..Default::default()
        }));
        env.idempotency_key = Some(idempotency_key.to_string());
        env
    }

    #[tokio::test]
    async fn ephemeral_ops_are_never_persisted() {
        let log = log().await;
        let env = Envelope::new(Op::StateGet(crate::envelope::StateGetParams {
            scope: crate::envelope::StateScope::Global,
            key: "k".into(),
            window_id: None,
        }));
        log.persist(&env).await;
        let rows = log.store.load_ordered().await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn persisted_rows_replay_in_insertion_order() {
        let log = log().await;
        log.persist(&window_create_envelope("w1", "i1")).await;
        log.persist(&window_create_envelope("w2", "i2")).await;
        let items = log.load_for_replay().await.unwrap();
        assert_eq!(items.len(), 2);
        match &items[0].envelope.op {
            Op::WindowCreate(p) => assert_eq!(p.id, "w1"),
            _ => panic!("expected window.create"),
        }
    }

    #[tokio::test]
    async fn replay_dedupes_identical_tool_and_args() {
        let log = log().await;
        log.persist(&window_create_envelope("w1", "i1")).await;
        let rows = log.store.load_ordered().await.unwrap();
        let mut duplicated = rows.clone();
        duplicated.extend(rows);
        let items = log.replay_items(duplicated).unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn clear_for_window_only_removes_matching_rows() {
        let log = log().await;
        log.persist(&window_create_envelope("w1", "i1")).await;
        log.persist(&window_create_envelope("w2", "i2")).await;
        log.clear(Some("w1")).await.unwrap();
        let rows = log.store.load_ordered().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].args["id"], "w2");
    }
}
