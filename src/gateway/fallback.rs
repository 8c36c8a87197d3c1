//! Last-resort responses when neither cache nor network can answer.

use serde_json::json;
use url::Url;

use super::strategy::lookup;
use crate::cache::{CacheGeneration, CacheStore};
use crate::http::{CachedResponse, GatewayRequest};

pub const OFFLINE_API_MESSAGE: &str = "Offline - cached data not available";

/// Build the offline answer for a request whose strategy failed.
///
/// - navigations get the cached offline page, or a bare 503
/// - API calls get any stale copy, or a 503 JSON envelope
/// - everything else gets any stale copy, or a bare 503
pub fn offline_response<S: CacheStore>(
  generation: &CacheGeneration<S>,
  request: &GatewayRequest,
  offline_page: &str,
  api_prefix: &str,
) -> CachedResponse {
  if request.is_navigation() {
    return offline_page_url(&request.url, offline_page)
      .and_then(|url| lookup(generation, &GatewayRequest::get(url)))
      .map(|entry| entry.response)
      .unwrap_or_else(|| CachedResponse::text(503, "Offline"));
  }

  if let Some(entry) = lookup(generation, request) {
    return entry.response;
  }

  if request.url.path().starts_with(api_prefix) {
    CachedResponse::json(
      503,
      &json!({
        "success": false,
        "message": OFFLINE_API_MESSAGE,
        "offline": true,
      }),
    )
  } else {
    CachedResponse::text(503, "Offline - resource not available")
  }
}

fn offline_page_url(request_url: &Url, offline_page: &str) -> Option<Url> {
  request_url.join(offline_page).ok()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::testing::url;
  use std::sync::Arc;

  fn generation() -> CacheGeneration<SqliteStorage> {
    let store = Arc::new(SqliteStorage::open_in_memory().unwrap());
    store.create_generation("vasa-v1", "v1").unwrap();
    CacheGeneration::new(store, "vasa-v1", "v1")
  }

  fn fallback(generation: &CacheGeneration<SqliteStorage>, request: &GatewayRequest) -> CachedResponse {
    offline_response(generation, request, "/offline.html", "/api/")
  }

  #[test]
  fn test_navigation_gets_offline_page() {
    let generation = generation();
    generation
      .put(
        &GatewayRequest::get(url("/offline.html")),
        &CachedResponse::text(200, "<h1>You are offline</h1>"),
      )
      .unwrap();

    let response = fallback(&generation, &GatewayRequest::navigate(url("/compliance")));

    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "<h1>You are offline</h1>");
  }

  #[test]
  fn test_navigation_without_offline_page_is_503() {
    let response = fallback(&generation(), &GatewayRequest::navigate(url("/")));

    assert_eq!(response.status, 503);
    assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
  }

  #[test]
  fn test_api_envelope() {
    let response = fallback(&generation(), &GatewayRequest::get(url("/api/orders")));

    assert_eq!(response.status, 503);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(
      body,
      json!({"success": false, "message": OFFLINE_API_MESSAGE, "offline": true})
    );
  }

  #[test]
  fn test_api_prefers_stale_copy() {
    let generation = generation();
    let request = GatewayRequest::get(url("/api/orders"));
    generation
      .put(&request, &CachedResponse::text(200, "[]"))
      .unwrap();

    assert_eq!(fallback(&generation, &request).body_text(), "[]");
  }

  #[test]
  fn test_other_resource_is_503() {
    let response = fallback(&generation(), &GatewayRequest::get(url("/feed")));
    assert_eq!(response.status, 503);
  }
}
