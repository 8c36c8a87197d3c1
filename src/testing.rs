//! Test doubles shared by the gateway tests.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{
  CacheKey, CacheStore, CachedEntry, GenerationInfo, GenerationState, PendingAction,
  SqliteStorage,
};
use crate::config::Config;
use crate::gateway::Gateway;
use crate::http::{CachedResponse, GatewayRequest};
use crate::network::Network;

pub const ORIGIN: &str = "https://vasa.test";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

pub fn test_config() -> Config {
  Config {
    origin: ORIGIN.to_string(),
    precache: vec!["/".to_string(), "/offline.html".to_string()],
    ..Config::default()
  }
}

/// Scripted network: answers from a route table, records every call, and can
/// be switched offline.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, CachedResponse>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Answer requests for `path` with `response` from now on.
  pub fn respond(&self, path: &str, response: CachedResponse) {
    self
      .routes
      .lock()
      .unwrap()
      .insert(url(path).to_string(), response);
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_count(&self, path: &str) -> usize {
    let target = url(path).to_string();
    self.calls().iter().filter(|u| **u == target).count()
  }
}

impl Network for FakeNetwork {
  fn fetch(&self, request: &GatewayRequest) -> impl Future<Output = Result<CachedResponse>> + Send {
    let target = request.url.to_string();
    self.calls.lock().unwrap().push(target.clone());

    let result = if self.offline.load(Ordering::SeqCst) {
      Err(eyre!("Network request to {} failed: offline", target))
    } else {
      self
        .routes
        .lock()
        .unwrap()
        .get(&target)
        .cloned()
        .ok_or_else(|| eyre!("Network request to {} failed: connection refused", target))
    };

    async move { result }
  }
}

/// Store wrapper whose entry writes always fail.
pub struct FailingWrites(pub SqliteStorage);

impl CacheStore for FailingWrites {
  fn create_generation(&self, name: &str, version: &str) -> Result<()> {
    self.0.create_generation(name, version)
  }

  fn set_generation_state(&self, name: &str, state: GenerationState) -> Result<()> {
    self.0.set_generation_state(name, state)
  }

  fn generations(&self) -> Result<Vec<GenerationInfo>> {
    self.0.generations()
  }

  fn delete_generation(&self, name: &str) -> Result<bool> {
    self.0.delete_generation(name)
  }

  fn get(&self, generation: &str, key: &CacheKey) -> Result<Option<CachedEntry>> {
    self.0.get(generation, key)
  }

  fn put(&self, _generation: &str, _key: &CacheKey, _response: &CachedResponse) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn put_all(&self, _generation: &str, _entries: &[(CacheKey, CachedResponse)]) -> Result<()> {
    Err(eyre!("disk full"))
  }

  fn delete(&self, generation: &str, key: &CacheKey) -> Result<bool> {
    self.0.delete(generation, key)
  }

  fn keys(&self, generation: &str) -> Result<Vec<CacheKey>> {
    self.0.keys(generation)
  }

  fn queue_action(&self, action: &PendingAction) -> Result<()> {
    self.0.queue_action(action)
  }

  fn queued_actions(&self) -> Result<Vec<PendingAction>> {
    self.0.queued_actions()
  }

  fn remove_action(&self, id: &str) -> Result<bool> {
    self.0.remove_action(id)
  }

  fn record_attempt(&self, id: &str, next_attempt_at: DateTime<Utc>) -> Result<()> {
    self.0.record_attempt(id, next_attempt_at)
  }
}

pub struct Harness {
  pub gateway: Gateway<SqliteStorage, FakeNetwork>,
  pub store: Arc<SqliteStorage>,
  pub network: Arc<FakeNetwork>,
}

/// A gateway over an in-memory store, not yet installed.
pub fn harness_with(config: Config) -> Harness {
  let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
  let network = Arc::new(FakeNetwork::new());
  let gateway = Gateway::new(config, Arc::clone(&store), Arc::clone(&network)).unwrap();

  Harness {
    gateway,
    store,
    network,
  }
}

/// A gateway whose `v1` generation is installed and active.
pub async fn active_harness() -> Harness {
  let harness = harness_with(test_config());
  harness
    .network
    .respond("/", CachedResponse::text(200, "<html>shell</html>"));
  harness
    .network
    .respond("/offline.html", CachedResponse::text(200, "<html>offline</html>"));
  harness.gateway.install().await.unwrap();
  harness
}
