//! Request classification: which strategy answers a request.

use url::Url;

use crate::config::RouteConfig;
use crate::http::GatewayRequest;

/// Resource kind, derived purely from the request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
  /// Fingerprinted or rarely-changing files: cache-first
  StaticAsset,
  /// JSON endpoints: network-first
  Api,
  /// Navigable app pages: stale-while-revalidate
  DynamicPage,
  /// Everything else, handled like `Api`
  Other,
}

impl ResourceClass {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::StaticAsset => "static-asset",
      Self::Api => "api",
      Self::DynamicPage => "dynamic-page",
      Self::Other => "other",
    }
  }
}

/// Classify a path. Rules are checked in order; the first match wins.
pub fn classify(path: &str, routes: &RouteConfig) -> ResourceClass {
  if is_static_asset(path, routes) {
    ResourceClass::StaticAsset
  } else if path.starts_with(&routes.api_prefix) {
    ResourceClass::Api
  } else if routes
    .page_prefixes
    .iter()
    .any(|prefix| matches_route(path, prefix))
  {
    ResourceClass::DynamicPage
  } else {
    ResourceClass::Other
  }
}

/// Only same-origin GETs are intercepted; everything else passes through.
pub fn should_intercept(request: &GatewayRequest, origin: &Url) -> bool {
  request.is_get() && request.url.origin() == origin.origin()
}

fn is_static_asset(path: &str, routes: &RouteConfig) -> bool {
  let last_segment = path.rsplit('/').next().unwrap_or_default();
  // A dot after the first character and before the last: "app.js", not ".env"
  let has_extension = last_segment
    .rfind('.')
    .is_some_and(|i| i > 0 && i + 1 < last_segment.len());

  has_extension
    || routes
      .asset_prefixes
      .iter()
      .any(|prefix| path.starts_with(prefix.as_str()))
    || routes
      .asset_extensions
      .iter()
      .any(|ext| path.ends_with(&format!(".{}", ext)))
}

/// `/orders` matches `/orders` and `/orders/42`, not `/ordersheet`.
fn matches_route(path: &str, prefix: &str) -> bool {
  let prefix = prefix.trim_end_matches('/');
  match path.strip_prefix(prefix) {
    Some(rest) => rest.is_empty() || rest.starts_with('/'),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn class(path: &str) -> ResourceClass {
    classify(path, &RouteConfig::default())
  }

  #[test]
  fn test_static_assets() {
    assert_eq!(class("/styles/globals.css"), ResourceClass::StaticAsset);
    assert_eq!(class("/_next/static/chunks/main.js"), ResourceClass::StaticAsset);
    assert_eq!(class("/manifest.json"), ResourceClass::StaticAsset);
    assert_eq!(class("/icons/badge"), ResourceClass::StaticAsset);
    assert_eq!(class("/images/products/42"), ResourceClass::StaticAsset);
  }

  #[test]
  fn test_api() {
    assert_eq!(class("/api/search/popular"), ResourceClass::Api);
    assert_eq!(class("/api/cart"), ResourceClass::Api);
  }

  #[test]
  fn test_dynamic_pages() {
    assert_eq!(class("/search"), ResourceClass::DynamicPage);
    assert_eq!(class("/listings/123"), ResourceClass::DynamicPage);
    assert_eq!(class("/orders/"), ResourceClass::DynamicPage);
    assert_eq!(class("/messages/abc"), ResourceClass::DynamicPage);
  }

  #[test]
  fn test_other() {
    assert_eq!(class("/"), ResourceClass::Other);
    assert_eq!(class("/compliance"), ResourceClass::Other);
    assert_eq!(class("/ordersheet"), ResourceClass::Other);
    assert_eq!(class("/.well-known/"), ResourceClass::Other);
  }

  #[test]
  fn test_intercepts_only_same_origin_get() {
    let origin = Url::parse("https://vasa.test").unwrap();
    let same = Url::parse("https://vasa.test/api/cart").unwrap();
    let cross = Url::parse("https://cdn.example.com/app.js").unwrap();

    assert!(should_intercept(&GatewayRequest::get(same.clone()), &origin));
    assert!(!should_intercept(&GatewayRequest::get(cross), &origin));

    let mut post = GatewayRequest::get(same);
    post.method = reqwest::Method::POST;
    assert!(!should_intercept(&post, &origin));
  }
}
