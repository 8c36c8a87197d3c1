//! Explicit handle on one cache generation.

use color_eyre::Result;
use std::sync::Arc;

use super::traits::{CacheKey, CacheStore, CachedEntry};
use crate::http::{CachedResponse, GatewayRequest};

/// A named, versioned view onto the cache store.
///
/// Strategies receive this handle instead of reaching for a process-wide
/// "current cache", so tests can hand them any store.
pub struct CacheGeneration<S: CacheStore> {
  store: Arc<S>,
  name: String,
  version: String,
}

impl<S: CacheStore> CacheGeneration<S> {
  pub fn new(store: Arc<S>, name: impl Into<String>, version: impl Into<String>) -> Self {
    Self {
      store,
      name: name.into(),
      version: version.into(),
    }
  }

  /// Generation name for `version`, e.g. `vasa-v3`.
  pub fn name_for(prefix: &str, version: &str) -> String {
    format!("{}-{}", prefix, version)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn version(&self) -> &str {
    &self.version
  }

  pub fn match_request(&self, request: &GatewayRequest) -> Result<Option<CachedEntry>> {
    self.store.get(&self.name, &request.cache_key())
  }

  pub fn put(&self, request: &GatewayRequest, response: &CachedResponse) -> Result<()> {
    self.store.put(&self.name, &request.cache_key(), response)
  }

  /// Store every pair or none of them.
  pub fn put_all(&self, entries: &[(GatewayRequest, CachedResponse)]) -> Result<()> {
    let keyed: Vec<(CacheKey, CachedResponse)> = entries
      .iter()
      .map(|(request, response)| (request.cache_key(), response.clone()))
      .collect();
    self.store.put_all(&self.name, &keyed)
  }

  pub fn delete(&self, request: &GatewayRequest) -> Result<bool> {
    self.store.delete(&self.name, &request.cache_key())
  }

  pub fn keys(&self) -> Result<Vec<CacheKey>> {
    self.store.keys(&self.name)
  }
}

impl<S: CacheStore> Clone for CacheGeneration<S> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      name: self.name.clone(),
      version: self.version.clone(),
    }
  }
}

impl<S: CacheStore> std::fmt::Debug for CacheGeneration<S> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheGeneration")
      .field("name", &self.name)
      .field("version", &self.version)
      .finish_non_exhaustive()
  }
}
