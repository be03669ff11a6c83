//! Durable subscriber storage.
//!
//! Records are stored as JSON documents keyed by subscriber id. The last
//! update frame lives in its own table so the record row stays small.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use leasewatch_id::SubscriberId;
use leasewatch_snapshot::UpdateFrame;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use crate::subscriber::Subscriber;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("subscriber not found: {0}")]
    NotFound(SubscriberId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Keyed subscriber storage.
pub trait SubscriberStore: Send + Sync {
    /// Load every stored subscriber.
    fn load_all(&self) -> Result<HashMap<SubscriberId, Subscriber>, StoreError>;

    /// Store every subscriber in `subscribers`. Records not in the map are
    /// left untouched.
    fn save_all(&self, subscribers: &HashMap<SubscriberId, Subscriber>) -> Result<(), StoreError>;
}

/// SQLite subscriber store.
pub struct SqliteSubscriberStore {
    conn: Mutex<Connection>,
}

impl SqliteSubscriberStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.connection()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                id INTEGER PRIMARY KEY,
                record TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS frames (
                subscriber_id INTEGER PRIMARY KEY,
                frame TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )?;

        debug!("Subscriber store schema initialized");
        Ok(())
    }

    /// Load one subscriber.
    pub fn load(&self, id: SubscriberId) -> Result<Subscriber, StoreError> {
        let conn = self.connection()?;

        let record: Option<String> = conn
            .query_row(
                "SELECT record FROM subscribers WHERE id = ?1",
                params![id.value()],
                |row| row.get(0),
            )
            .optional()?;
        let record = record.ok_or(StoreError::NotFound(id))?;

        let frame: Option<String> = conn
            .query_row(
                "SELECT frame FROM frames WHERE subscriber_id = ?1",
                params![id.value()],
                |row| row.get(0),
            )
            .optional()?;

        let mut subscriber: Subscriber = serde_json::from_str(&record)?;
        if let Some(frame) = frame {
            subscriber.last_frame = serde_json::from_str(&frame)?;
        }
        Ok(subscriber)
    }

    /// Number of stored subscribers.
    pub fn count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .connection()?
            .query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SubscriberStore for SqliteSubscriberStore {
    fn load_all(&self) -> Result<HashMap<SubscriberId, Subscriber>, StoreError> {
        let conn = self.connection()?;

        let mut frames: HashMap<i64, String> = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT subscriber_id, frame FROM frames")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in rows {
                let (id, frame) = row?;
                frames.insert(id, frame);
            }
        }

        let mut stmt = conn.prepare("SELECT id, record FROM subscribers")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut subscribers = HashMap::new();
        for row in rows {
            let (id, record) = row?;
            let mut subscriber: Subscriber = serde_json::from_str(&record)?;
            if let Some(frame) = frames.remove(&id) {
                subscriber.last_frame = serde_json::from_str::<UpdateFrame>(&frame)?;
            }
            subscribers.insert(subscriber.id, subscriber);
        }

        debug!(count = subscribers.len(), "Loaded subscribers");
        Ok(subscribers)
    }

    fn save_all(&self, subscribers: &HashMap<SubscriberId, Subscriber>) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        let now = Utc::now().timestamp();
        let tx = conn.transaction()?;

        {
            let mut upsert_record = tx.prepare_cached(
                "INSERT INTO subscribers (id, record, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
            )?;
            let mut upsert_frame = tx.prepare_cached(
                "INSERT INTO frames (subscriber_id, frame, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(subscriber_id) DO UPDATE SET frame = excluded.frame, updated_at = excluded.updated_at",
            )?;

            for subscriber in subscribers.values() {
                let record = serde_json::to_string(subscriber)?;
                let frame = serde_json::to_string(&subscriber.last_frame)?;
                upsert_record.execute(params![subscriber.id.value(), record, now])?;
                upsert_frame.execute(params![subscriber.id.value(), frame, now])?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}
