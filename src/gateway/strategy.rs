//! Fetch strategies: how cache and network combine to answer a request.
//!
//! Every strategy writes successful (2xx) network responses into the
//! generation before returning them. Cache writes are best-effort: a failed
//! write is logged and the live response is still served.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::background::BackgroundTasks;
use crate::cache::{CacheGeneration, CacheStore, CachedEntry};
use crate::http::{CachedResponse, GatewayRequest};
use crate::network::Network;

/// Serve from cache when present; otherwise fetch and cache.
pub async fn cache_first<S: CacheStore, N: Network>(
  generation: &CacheGeneration<S>,
  network: &N,
  request: &GatewayRequest,
) -> Result<CachedResponse> {
  if let Some(entry) = lookup(generation, request) {
    debug!("Cache hit for {}", request.url);
    return Ok(entry.response);
  }

  debug!("Cache miss for {}, fetching", request.url);
  let response = network.fetch(request).await?;
  store(generation, request, &response);
  Ok(response)
}

/// Try the network; fall back to the cached copy when it cannot be reached.
pub async fn network_first<S: CacheStore, N: Network>(
  generation: &CacheGeneration<S>,
  network: &N,
  request: &GatewayRequest,
) -> Result<CachedResponse> {
  match network.fetch(request).await {
    Ok(response) => {
      store(generation, request, &response);
      Ok(response)
    }
    Err(e) => match lookup(generation, request) {
      Some(entry) => {
        info!(
          "Network unavailable for {}, serving copy cached at {}",
          request.url, entry.cached_at
        );
        Ok(entry.response)
      }
      None => Err(e),
    },
  }
}

/// Serve the cached copy immediately and refresh it in the background.
///
/// With nothing cached the caller waits for the network instead. The
/// background refresh is detached: its outcome never reaches the caller and
/// its failures are only logged.
pub async fn stale_while_revalidate<S: CacheStore, N: Network>(
  generation: &CacheGeneration<S>,
  network: &Arc<N>,
  request: &GatewayRequest,
  background: &BackgroundTasks,
) -> Result<CachedResponse> {
  match lookup(generation, request) {
    Some(entry) => {
      debug!("Serving cached {} while revalidating", request.url);

      let generation = generation.clone();
      let network = Arc::clone(network);
      let request = request.clone();
      background.spawn(async move {
        revalidate(&generation, network.as_ref(), &request).await;
      });

      Ok(entry.response)
    }
    None => {
      let response = network.fetch(request).await?;
      store(generation, request, &response);
      Ok(response)
    }
  }
}

async fn revalidate<S: CacheStore, N: Network>(
  generation: &CacheGeneration<S>,
  network: &N,
  request: &GatewayRequest,
) {
  match network.fetch(request).await {
    Ok(response) => store(generation, request, &response),
    Err(e) => debug!("Background revalidation of {} failed: {}", request.url, e),
  }
}

/// Cache read that treats storage errors as a miss.
pub(crate) fn lookup<S: CacheStore>(
  generation: &CacheGeneration<S>,
  request: &GatewayRequest,
) -> Option<CachedEntry> {
  match generation.match_request(request) {
    Ok(entry) => entry,
    Err(e) => {
      warn!("Cache read for {} failed: {}", request.url, e);
      None
    }
  }
}

/// Cache a successful response. Failures are logged and swallowed.
fn store<S: CacheStore>(
  generation: &CacheGeneration<S>,
  request: &GatewayRequest,
  response: &CachedResponse,
) {
  if !response.is_success() {
    debug!("Not caching {} (status {})", request.url, response.status);
    return;
  }

  if let Err(e) = generation.put(request, response) {
    warn!(
      "Failed to cache {} in {}: {}",
      request.url,
      generation.name(),
      e
    );
  }
}
