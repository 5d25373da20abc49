use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A named partition of the dedup store. Destinations are independently
/// keyed: novelty in one says nothing about the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Main,
    Alternate,
}

impl Destination {
    pub fn label(&self) -> &'static str {
        match self {
            Destination::Main => "Main",
            Destination::Alternate => "Alternate",
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Destination::Main => "media_main",
            Destination::Alternate => "media_alternate",
        }
    }
}

/// Keyed insert-if-absent for media identifiers. Implementations must be
/// idempotent per (destination, unique_key) and safe under concurrent
/// callers, even though the single-flight lock means the scanner only ever
/// issues one call at a time.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns true iff the key was not yet present in that destination.
    async fn insert_if_absent(
        &self,
        destination: Destination,
        unique_key: &str,
        content_ref: &str,
    ) -> Result<bool>;
}

pub struct SqliteDedupStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteDedupStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub async fn initialize(&self) -> Result<()> {
        let db = self.db.lock().await;
        for dest in [Destination::Main, Destination::Alternate] {
            db.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        unique_key TEXT PRIMARY KEY,
                        content_ref TEXT NOT NULL,
                        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
                    )",
                    dest.table()
                ),
                [],
            )?;
        }
        Ok(())
    }

    pub async fn count(&self, destination: Destination) -> Result<i64> {
        let db = self.db.lock().await;
        let n = db.query_row(
            &format!("SELECT COUNT(*) FROM {}", destination.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    #[cfg(test)]
    pub async fn content_ref(
        &self,
        destination: Destination,
        unique_key: &str,
    ) -> Result<Option<String>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(&format!(
            "SELECT content_ref FROM {} WHERE unique_key = ?1",
            destination.table()
        ))?;
        let mut rows = stmt.query([unique_key])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn insert_if_absent(
        &self,
        destination: Destination,
        unique_key: &str,
        content_ref: &str,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (unique_key, content_ref) VALUES (?1, ?2)",
                destination.table()
            ),
            (unique_key, content_ref),
        )?;
        Ok(changed == 1)
    }
}
