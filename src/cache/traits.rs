//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use url::Url;

use crate::http::{CachedResponse, GatewayRequest};

/// Normalized request identity used as the cache key.
///
/// Upper-cased method plus the absolute URL with its fragment removed. The
/// query string is kept: `/api/search?q=a` and `/api/search?q=b` are
/// different entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("{} {}", method.as_str().to_uppercase(), url))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Rebuild a key read back from storage.
  pub(crate) fn from_stored(raw: String) -> Self {
    Self(raw)
  }
}

impl std::fmt::Display for CacheKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// Lifecycle state of a persisted cache generation.
///
/// A superseded generation has no state: it is deleted outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
  /// Manifest is being fetched into the generation
  Installing,
  /// Fully populated, waiting for the current generation to step aside
  Waiting,
  /// Answers requests
  Active,
}

impl GenerationState {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Waiting => "waiting",
      Self::Active => "active",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "installing" => Ok(Self::Installing),
      "waiting" => Ok(Self::Waiting),
      "active" => Ok(Self::Active),
      other => Err(eyre!("Unknown generation state '{}'", other)),
    }
  }
}

/// A generation as recorded by the store.
#[derive(Debug, Clone)]
pub struct GenerationInfo {
  pub name: String,
  pub version: String,
  pub state: GenerationState,
  pub created_at: DateTime<Utc>,
  /// Number of cached entries
  pub entries: usize,
}

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  pub response: CachedResponse,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// A mutating request queued for replay by background sync.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingAction {
  /// Request identity (hex SHA-256 of method, URL and body)
  pub id: String,
  pub method: String,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Failed replay attempts so far
  pub attempts: u32,
  /// Replay is skipped until this instant
  pub next_attempt_at: DateTime<Utc>,
  pub queued_at: DateTime<Utc>,
}

impl PendingAction {
  /// Capture a request for later replay. Due immediately.
  pub fn from_request(request: &GatewayRequest) -> Self {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(request.method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(request.url.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(&request.body);
    let id = hex::encode(hasher.finalize());

    let now = Utc::now();
    Self {
      id,
      method: request.method.as_str().to_string(),
      url: request.url.to_string(),
      headers: request.headers.clone(),
      body: request.body.clone(),
      attempts: 0,
      next_attempt_at: now,
      queued_at: now,
    }
  }

  /// Rebuild the request for replay.
  pub fn to_request(&self) -> Result<GatewayRequest> {
    let mut request = GatewayRequest::parse(&self.method, &self.url)?;
    request.headers = self.headers.clone();
    request.body = self.body.clone();
    Ok(request)
  }
}

/// Trait for cache storage backends.
///
/// Entries are scoped to a named generation. Writing into a generation that
/// does not exist (for example one purged by a newer activation) is an error.
pub trait CacheStore: Send + Sync + 'static {
  /// Create (or reset) a generation in the `Installing` state.
  fn create_generation(&self, name: &str, version: &str) -> Result<()>;

  fn set_generation_state(&self, name: &str, state: GenerationState) -> Result<()>;

  /// All generations, oldest first.
  fn generations(&self) -> Result<Vec<GenerationInfo>>;

  /// Delete a generation and all its entries. Returns false if it did not exist.
  fn delete_generation(&self, name: &str) -> Result<bool>;

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedEntry>>;

  /// Store a response, replacing any previous entry for the key.
  fn put(&self, generation: &str, key: &CacheKey, response: &CachedResponse) -> Result<()>;

  /// Store several responses in one transaction: all or nothing.
  fn put_all(&self, generation: &str, entries: &[(CacheKey, CachedResponse)]) -> Result<()>;

  fn delete(&self, generation: &str, key: &CacheKey) -> Result<bool>;

  fn keys(&self, generation: &str) -> Result<Vec<CacheKey>>;

  /// Queue an action, replacing an existing one with the same id.
  fn queue_action(&self, action: &PendingAction) -> Result<()>;

  /// Queued actions, oldest first.
  fn queued_actions(&self) -> Result<Vec<PendingAction>>;

  fn remove_action(&self, id: &str) -> Result<bool>;

  /// Count a failed attempt and reschedule.
  fn record_attempt(&self, id: &str, next_attempt_at: DateTime<Utc>) -> Result<()>;
}
