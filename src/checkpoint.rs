use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::state::RunState;

/// Persists run state by thread id so a suspended run can be resumed.
///
/// `save` is an atomic overwrite of the thread's snapshot; `update` is a
/// shallow merge over the snapshot's top-level fields. Both are
/// serialized per thread id; different threads may proceed in parallel.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, thread_id: &str, state: &RunState) -> Result<(), String>;

    async fn load(&self, thread_id: &str) -> Result<Option<RunState>, String>;

    async fn update(&self, thread_id: &str, patch: Value) -> Result<(), String>;
}

fn merge_patch(state: &RunState, patch: Value) -> Result<RunState, String> {
    let mut value = serde_json::to_value(state).map_err(|e| e.to_string())?;
    let (Some(object), Value::Object(patch)) = (value.as_object_mut(), patch) else {
        return Err("patch must be a JSON object".to_string());
    };
    for (key, field) in patch {
        object.insert(key, field);
    }
    serde_json::from_value(value).map_err(|e| e.to_string())
}

/// A simple in-memory store for tests and single-process runs.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: std::sync::Mutex<HashMap<String, RunState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, thread_id: &str, state: &RunState) -> Result<(), String> {
        self.states
            .lock()
            .unwrap()
            .insert(thread_id.to_string(), state.clone());
        Ok(())
    }

    async fn load(&self, thread_id: &str) -> Result<Option<RunState>, String> {
        Ok(self.states.lock().unwrap().get(thread_id).cloned())
    }

    async fn update(&self, thread_id: &str, patch: Value) -> Result<(), String> {
        let mut states = self.states.lock().unwrap();
        let current = states
            .get(thread_id)
            .ok_or_else(|| format!("no checkpoint for thread '{thread_id}'"))?;
        let merged = merge_patch(current, patch)?;
        states.insert(thread_id.to_string(), merged);
        Ok(())
    }
}

/// Per-thread async locks so writers to the same row queue up while
/// distinct threads proceed in parallel.
#[derive(Default)]
struct KeyLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut inner = self.inner.lock().unwrap();
        Arc::clone(inner.entry(key.to_string()).or_default())
    }
}

/// A checkpoint store backed by a SQLite database. One row per thread;
/// saves are upserts, so the snapshot overwrite is atomic.
pub struct SqliteCheckpointStore {
    path:  std::path::PathBuf,
    locks: KeyLocks,
}

impl SqliteCheckpointStore {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Result<Self, String> {
        let path = path.into();
        let conn = rusqlite::Connection::open(&path).map_err(|e| e.to_string())?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id  TEXT PRIMARY KEY,
                state      TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| e.to_string())?;
        Ok(Self { path, locks: KeyLocks::default() })
    }

    fn get_conn(&self) -> Result<rusqlite::Connection, String> {
        rusqlite::Connection::open(&self.path).map_err(|e| e.to_string())
    }

    fn write_row(&self, thread_id: &str, state: &RunState) -> Result<(), String> {
        let conn = self.get_conn()?;
        let state_json = serde_json::to_string(state).map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO checkpoints (thread_id, state, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(thread_id) DO UPDATE SET
                 state = excluded.state,
                 updated_at = excluded.updated_at",
            rusqlite::params![thread_id, state_json, chrono::Utc::now().to_rfc3339()],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    fn read_row(&self, thread_id: &str) -> Result<Option<RunState>, String> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare("SELECT state FROM checkpoints WHERE thread_id = ?1")
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query(rusqlite::params![thread_id])
            .map_err(|e| e.to_string())?;
        match rows.next().map_err(|e| e.to_string())? {
            Some(row) => {
                let state_json: String = row.get(0).map_err(|e| e.to_string())?;
                let state = serde_json::from_str(&state_json).map_err(|e| e.to_string())?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, thread_id: &str, state: &RunState) -> Result<(), String> {
        let lock = self.locks.lock_for(thread_id);
        let _guard = lock.lock().await;
        self.write_row(thread_id, state)
    }

    async fn load(&self, thread_id: &str) -> Result<Option<RunState>, String> {
        self.read_row(thread_id)
    }

    async fn update(&self, thread_id: &str, patch: Value) -> Result<(), String> {
        let lock = self.locks.lock_for(thread_id);
        let _guard = lock.lock().await;
        let current = self
            .read_row(thread_id)?
            .ok_or_else(|| format!("no checkpoint for thread '{thread_id}'"))?;
        let merged = merge_patch(&current, patch)?;
        self.write_row(thread_id, &merged)
    }
}
