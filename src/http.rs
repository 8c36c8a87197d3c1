//! Request and response values that flow through the gateway.
//!
//! These are deliberately plain data: the network adapter converts to and
//! from `reqwest` types, and the cache stores them as rows.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::CacheKey;

/// How the client issued a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  /// Full page load (top-level navigation)
  Navigate,
  /// Subresource, XHR or fetch() call
  Resource,
}

/// An outbound request as seen by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRequest {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl GatewayRequest {
  /// A plain GET subresource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::Resource,
      headers: Vec::new(),
      body: Vec::new(),
    }
  }

  /// A GET navigation request.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  /// Build a request from its string parts.
  pub fn parse(method: &str, url: &str) -> Result<Self> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
      .map_err(|e| eyre!("Invalid HTTP method '{}': {}", method, e))?;
    let url = Url::parse(url).map_err(|e| eyre!("Invalid URL '{}': {}", url, e))?;

    Ok(Self {
      method,
      ..Self::get(url)
    })
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = body.into();
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  pub fn is_get(&self) -> bool {
    self.method == Method::GET
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn cache_key(&self) -> CacheKey {
    CacheKey::new(&self.method, &self.url)
  }
}

/// A captured HTTP response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// A `text/plain` response.
  pub fn text(status: u16, body: &str) -> Self {
    Self::new(status, body).with_header("content-type", "text/plain; charset=utf-8")
  }

  /// An `application/json` response.
  pub fn json(status: u16, value: &serde_json::Value) -> Self {
    Self::new(status, value.to_string()).with_header("content-type", "application/json")
  }

  /// A redirect to `location` with the given 3xx status.
  pub fn redirect(status: u16, location: &str) -> Self {
    Self::new(status, Vec::new()).with_header("location", location)
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// True for 2xx statuses. Only these are ever written to the cache.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header with the given name (case-insensitive).
  #[allow(dead_code)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn body_text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_uppercases_method() {
    let request = GatewayRequest::parse("post", "https://vasa.test/api/orders").unwrap();
    assert_eq!(request.method, Method::POST);
    assert!(!request.is_get());
    assert!(!request.is_navigation());
  }

  #[test]
  fn test_parse_rejects_relative_url() {
    assert!(GatewayRequest::parse("GET", "/api/orders").is_err());
  }

  #[test]
  fn test_success_range() {
    assert!(CachedResponse::new(200, "").is_success());
    assert!(CachedResponse::new(204, "").is_success());
    assert!(!CachedResponse::new(304, "").is_success());
    assert!(!CachedResponse::new(503, "").is_success());
  }

  #[test]
  fn test_header_lookup_is_case_insensitive() {
    let response = CachedResponse::json(200, &serde_json::json!({"ok": true}));
    assert_eq!(response.header("Content-Type"), Some("application/json"));
    assert_eq!(response.body_text(), r#"{"ok":true}"#);
  }
}
