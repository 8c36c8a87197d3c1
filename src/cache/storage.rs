//! SQLite implementation of the cache store.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{
  CacheKey, CacheStore, CachedEntry, GenerationInfo, GenerationState, PendingAction,
};
use crate::http::CachedResponse;

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, creating it if needed.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database that lives only as long as this value.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("vasa-gateway").join("cache.db"))
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per cache generation
CREATE TABLE IF NOT EXISTS generations (
    name TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Request -> response pairs, scoped to a generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (generation, request_key)
);

-- Mutating requests waiting for background sync; survives generation purges
CREATE TABLE IF NOT EXISTS offline_actions (
    id TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    next_attempt_at TEXT NOT NULL,
    queued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_actions_queued ON offline_actions(queued_at);
"#;

impl CacheStore for SqliteStorage {
  fn create_generation(&self, name: &str, version: &str) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to clear generation {}: {}", name, e))?;

    tx.execute(
      "INSERT OR REPLACE INTO generations (name, version, state, created_at)
       VALUES (?, ?, ?, ?)",
      params![
        name,
        version,
        GenerationState::Installing.as_str(),
        format_datetime(Utc::now())
      ],
    )
    .map_err(|e| eyre!("Failed to create generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn set_generation_state(&self, name: &str, state: GenerationState) -> Result<()> {
    let conn = self.conn()?;
    let changed = conn
      .execute(
        "UPDATE generations SET state = ? WHERE name = ?",
        params![state.as_str(), name],
      )
      .map_err(|e| eyre!("Failed to update generation {}: {}", name, e))?;

    if changed == 0 {
      return Err(eyre!("Cache generation {} does not exist", name));
    }

    Ok(())
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT g.name, g.version, g.state, g.created_at, COUNT(e.request_key)
         FROM generations g
         LEFT JOIN cache_entries e ON e.generation = g.name
         GROUP BY g.name
         ORDER BY g.created_at, g.name",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String, String, String, i64)> = stmt
      .query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
      })
      .map_err(|e| eyre!("Failed to query generations: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read generation row: {}", e))?;

    rows
      .into_iter()
      .map(|(name, version, state, created_at, entries)| {
        Ok(GenerationInfo {
          name,
          version,
          state: GenerationState::parse(&state)?,
          created_at: parse_datetime(&created_at)?,
          entries: usize::try_from(entries).unwrap_or_default(),
        })
      })
      .collect()
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE generation = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let deleted = tx
      .execute("DELETE FROM generations WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete generation {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted > 0)
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![generation, key.as_str()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((status, headers, body, cached_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers of {}: {}", key, e))?;
        Ok(Some(CachedEntry {
          response: CachedResponse {
            status,
            headers,
            body,
          },
          cached_at: parse_datetime(&cached_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, generation: &str, key: &CacheKey, response: &CachedResponse) -> Result<()> {
    let conn = self.conn()?;
    insert_entry(&conn, generation, key, response)
  }

  fn put_all(&self, generation: &str, entries: &[(CacheKey, CachedResponse)]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, response) in entries {
      insert_entry(&tx, generation, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete(&self, generation: &str, key: &CacheKey) -> Result<bool> {
    let conn = self.conn()?;
    let deleted = conn
      .execute(
        "DELETE FROM cache_entries WHERE generation = ? AND request_key = ?",
        params![generation, key.as_str()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;

    Ok(deleted > 0)
  }

  fn keys(&self, generation: &str) -> Result<Vec<CacheKey>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT request_key FROM cache_entries WHERE generation = ? ORDER BY request_key",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![generation], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;

    Ok(keys.into_iter().map(CacheKey::from_stored).collect())
  }

  fn queue_action(&self, action: &PendingAction) -> Result<()> {
    let conn = self.conn()?;
    let headers = serde_json::to_string(&action.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO offline_actions
           (id, method, url, headers, body, attempts, next_attempt_at, queued_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          action.id,
          action.method,
          action.url,
          headers,
          action.body,
          action.attempts,
          format_datetime(action.next_attempt_at),
          format_datetime(action.queued_at)
        ],
      )
      .map_err(|e| eyre!("Failed to queue offline action: {}", e))?;

    Ok(())
  }

  fn queued_actions(&self) -> Result<Vec<PendingAction>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, method, url, headers, body, attempts, next_attempt_at, queued_at
         FROM offline_actions ORDER BY queued_at, id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    type Row = (String, String, String, String, Vec<u8>, u32, String, String);
    let rows: Vec<Row> = stmt
      .query_map([], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query offline actions: {}", e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read offline action: {}", e))?;

    rows
      .into_iter()
      .map(
        |(id, method, url, headers, body, attempts, next_attempt_at, queued_at)| {
          Ok(PendingAction {
            headers: serde_json::from_str(&headers)
              .map_err(|e| eyre!("Failed to deserialize headers of action {}: {}", id, e))?,
            id,
            method,
            url,
            body,
            attempts,
            next_attempt_at: parse_datetime(&next_attempt_at)?,
            queued_at: parse_datetime(&queued_at)?,
          })
        },
      )
      .collect()
  }

  fn remove_action(&self, id: &str) -> Result<bool> {
    let conn = self.conn()?;
    let deleted = conn
      .execute("DELETE FROM offline_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove offline action {}: {}", id, e))?;

    Ok(deleted > 0)
  }

  fn record_attempt(&self, id: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "UPDATE offline_actions SET attempts = attempts + 1, next_attempt_at = ? WHERE id = ?",
        params![format_datetime(next_attempt_at), id],
      )
      .map_err(|e| eyre!("Failed to record attempt for {}: {}", id, e))?;

    Ok(())
  }
}

/// Insert or replace one entry, refusing generations that do not exist.
fn insert_entry(
  conn: &Connection,
  generation: &str,
  key: &CacheKey,
  response: &CachedResponse,
) -> Result<()> {
  let exists = conn
    .query_row(
      "SELECT 1 FROM generations WHERE name = ?",
      params![generation],
      |_| Ok(()),
    )
    .optional()
    .map_err(|e| eyre!("Failed to look up generation {}: {}", generation, e))?
    .is_some();

  if !exists {
    return Err(eyre!("Cache generation {} does not exist", generation));
  }

  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  conn
    .execute(
      "INSERT OR REPLACE INTO cache_entries (generation, request_key, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        generation,
        key.as_str(),
        response.status,
        headers,
        response.body,
        format_datetime(Utc::now())
      ],
    )
    .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

  Ok(())
}

/// Timestamps are stored as fixed-width RFC 3339 so they sort lexically.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::GatewayRequest;
  use url::Url;

  fn key(path: &str) -> CacheKey {
    let url = Url::parse("https://vasa.test").unwrap().join(path).unwrap();
    GatewayRequest::get(url).cache_key()
  }

  #[test]
  fn test_put_replaces_entry() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("vasa-v1", "v1").unwrap();

    storage
      .put("vasa-v1", &key("/a.css"), &CachedResponse::new(200, "old"))
      .unwrap();
    storage
      .put("vasa-v1", &key("/a.css"), &CachedResponse::new(200, "new"))
      .unwrap();

    let entry = storage.get("vasa-v1", &key("/a.css")).unwrap().unwrap();
    assert_eq!(entry.response.body_text(), "new");
    assert_eq!(storage.keys("vasa-v1").unwrap().len(), 1);
  }

  #[test]
  fn test_put_into_missing_generation_fails() {
    let storage = SqliteStorage::open_in_memory().unwrap();

    let result = storage.put("vasa-v0", &key("/a.css"), &CachedResponse::new(200, ""));
    assert!(result.is_err());
  }

  #[test]
  fn test_put_all_is_atomic() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("vasa-v1", "v1").unwrap();

    let entries = vec![
      (key("/"), CachedResponse::new(200, "shell")),
      (key("/offline.html"), CachedResponse::new(200, "offline")),
    ];
    storage.put_all("vasa-v1", &entries).unwrap();
    assert_eq!(storage.keys("vasa-v1").unwrap().len(), 2);

    // Unknown generation: nothing lands anywhere
    assert!(storage.put_all("vasa-v2", &entries).is_err());
    assert!(storage.keys("vasa-v2").unwrap().is_empty());
  }

  #[test]
  fn test_delete_generation_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("vasa-v1", "v1").unwrap();
    storage
      .put("vasa-v1", &key("/a.css"), &CachedResponse::new(200, ""))
      .unwrap();

    assert!(storage.delete_generation("vasa-v1").unwrap());
    assert!(!storage.delete_generation("vasa-v1").unwrap());
    assert!(storage.get("vasa-v1", &key("/a.css")).unwrap().is_none());
    assert!(storage.generations().unwrap().is_empty());
  }

  #[test]
  fn test_generations_report_state_and_count() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.create_generation("vasa-v1", "v1").unwrap();
    storage
      .put("vasa-v1", &key("/a.css"), &CachedResponse::new(200, ""))
      .unwrap();
    storage
      .set_generation_state("vasa-v1", GenerationState::Active)
      .unwrap();

    let generations = storage.generations().unwrap();
    assert_eq!(generations.len(), 1);
    assert_eq!(generations[0].version, "v1");
    assert_eq!(generations[0].state, GenerationState::Active);
    assert_eq!(generations[0].entries, 1);

    assert!(storage
      .set_generation_state("vasa-v9", GenerationState::Active)
      .is_err());
  }

  #[test]
  fn test_offline_action_queue() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let request = GatewayRequest::parse("POST", "https://vasa.test/api/orders")
      .unwrap()
      .with_body("{}");
    let action = PendingAction::from_request(&request);

    storage.queue_action(&action).unwrap();
    // Same identity replaces rather than duplicates
    storage.queue_action(&action).unwrap();

    let later = Utc::now() + chrono::Duration::minutes(5);
    storage.record_attempt(&action.id, later).unwrap();

    let queued = storage.queued_actions().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].attempts, 1);
    assert_eq!(queued[0].body, b"{}");
    assert!(queued[0].next_attempt_at > Utc::now());

    assert!(storage.remove_action(&action.id).unwrap());
    assert!(storage.queued_actions().unwrap().is_empty());
  }
}
